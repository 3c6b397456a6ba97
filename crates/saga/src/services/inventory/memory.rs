//! In-memory inventory with compare-and-swap stock updates.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use common::{AggregateId, TenantId};
use market_domain::{CatalogItem, ProductId};

use super::{InventoryError, InventoryStore};

/// Stock in the low 32 bits, revision in the high 32 bits, so a single
/// compare-and-swap checks and updates both.
#[derive(Debug)]
struct StockWord(AtomicU64);

impl StockWord {
    fn new(stock: u32, revision: u32) -> Self {
        Self(AtomicU64::new(pack(stock, revision)))
    }

    fn load(&self) -> (u32, u32) {
        unpack(self.0.load(Ordering::Acquire))
    }

    /// Subtracts `quantity` if enough stock remains; otherwise returns the
    /// stock observed.
    fn take(&self, quantity: u32) -> Result<(), u32> {
        self.update(|stock| stock.checked_sub(quantity).ok_or(stock))
    }

    fn give_back(&self, quantity: u32) -> Result<(), u32> {
        self.update(|stock| stock.checked_add(quantity).ok_or(stock))
    }

    fn update(&self, f: impl Fn(u32) -> Result<u32, u32>) -> Result<(), u32> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let (stock, revision) = unpack(current);
            let next = pack(f(stock)?, revision.wrapping_add(1));
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }
}

fn pack(stock: u32, revision: u32) -> u64 {
    (u64::from(revision) << 32) | u64::from(stock)
}

fn unpack(word: u64) -> (u32, u32) {
    (word as u32, (word >> 32) as u32)
}

#[derive(Debug)]
struct Listing {
    item: CatalogItem,
    stock: StockWord,
}

impl Listing {
    fn snapshot(&self) -> CatalogItem {
        let (stock, revision) = self.stock.load();
        CatalogItem {
            stock,
            revision: u64::from(revision),
            ..self.item.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reservation {
    /// Claimed by an in-flight reserve call.
    Taking,
    Held(u32),
    Released(u32),
}

/// In-memory inventory store.
///
/// The listing map is only locked to look up an item's `Arc`; stock changes
/// happen on the item's atomic word after the guard is dropped, so checkouts
/// of unrelated products never wait on each other.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventory {
    listings: Arc<RwLock<HashMap<ProductId, Arc<Listing>>>>,
    ledger: Arc<Mutex<HashMap<(AggregateId, ProductId), Reservation>>>,
}

impl InMemoryInventory {
    /// Creates an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a catalog item.
    pub fn add_item(&self, item: CatalogItem) {
        let stock = StockWord::new(item.stock, item.revision as u32);
        let listing = Arc::new(Listing { item, stock });
        self.listings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(listing.item.id, listing);
    }

    /// Returns the available stock of a product.
    pub fn stock_of(&self, product_id: ProductId) -> Option<u32> {
        self.listing(product_id).map(|l| l.stock.load().0)
    }

    /// Returns the current snapshot of a product.
    pub fn item(&self, product_id: ProductId) -> Option<CatalogItem> {
        self.listing(product_id).map(|l| l.snapshot())
    }

    /// Returns the number of reservations currently holding stock.
    pub fn held_reservations(&self) -> usize {
        self.lock_ledger()
            .values()
            .filter(|r| matches!(r, Reservation::Held(_)))
            .count()
    }

    /// Returns the number of `(order, product)` entries tracked, settled
    /// orders excluded.
    pub fn ledger_len(&self) -> usize {
        self.lock_ledger().len()
    }

    fn listing(&self, product_id: ProductId) -> Option<Arc<Listing>> {
        self.listings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&product_id)
            .cloned()
    }

    fn tenant_listing(
        &self,
        product_id: ProductId,
        tenant: &TenantId,
    ) -> Result<Arc<Listing>, InventoryError> {
        self.listing(product_id)
            .filter(|l| &l.item.tenant_id == tenant)
            .ok_or(InventoryError::ProductNotFound { product_id })
    }

    fn lock_ledger(&self) -> std::sync::MutexGuard<'_, HashMap<(AggregateId, ProductId), Reservation>> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventory {
    async fn find_by_ids_and_tenant(
        &self,
        ids: &[ProductId],
        tenant: &TenantId,
    ) -> Result<Vec<CatalogItem>, InventoryError> {
        let listings = self.listings.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ids
            .iter()
            .filter_map(|id| listings.get(id))
            .filter(|l| &l.item.tenant_id == tenant)
            .map(|l| l.snapshot())
            .collect())
    }

    async fn reserve(
        &self,
        order_id: AggregateId,
        tenant: &TenantId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        let listing = self.tenant_listing(product_id, tenant)?;

        match self.lock_ledger().entry((order_id, product_id)) {
            Entry::Occupied(entry) => {
                return match entry.get() {
                    Reservation::Held(_) => Ok(()),
                    Reservation::Released(_) => Err(InventoryError::ReservationReleased {
                        order_id,
                        product_id,
                    }),
                    Reservation::Taking => Err(InventoryError::Storage(format!(
                        "reservation for order {order_id} and product {product_id} is in flight"
                    ))),
                };
            }
            Entry::Vacant(entry) => {
                entry.insert(Reservation::Taking);
            }
        }

        let taken = listing.stock.take(quantity);

        let mut ledger = self.lock_ledger();
        match taken {
            Ok(()) => {
                ledger.insert((order_id, product_id), Reservation::Held(quantity));
                metrics::counter!("inventory_reservations_total", "outcome" => "reserved")
                    .increment(1);
                Ok(())
            }
            Err(available) => {
                ledger.remove(&(order_id, product_id));
                metrics::counter!("inventory_reservations_total", "outcome" => "insufficient")
                    .increment(1);
                Err(InventoryError::InsufficientStock {
                    product_id,
                    requested: quantity,
                    available,
                })
            }
        }
    }

    async fn release(
        &self,
        order_id: AggregateId,
        tenant: &TenantId,
        product_id: ProductId,
    ) -> Result<(), InventoryError> {
        let listing = self.tenant_listing(product_id, tenant)?;

        let quantity = {
            let mut ledger = self.lock_ledger();
            match ledger.get(&(order_id, product_id)).copied() {
                Some(Reservation::Held(quantity)) => {
                    ledger.insert((order_id, product_id), Reservation::Released(quantity));
                    quantity
                }
                _ => return Ok(()),
            }
        };

        listing.stock.give_back(quantity).map_err(|stock| {
            InventoryError::Storage(format!(
                "releasing {quantity} units of {product_id} overflows stock {stock}"
            ))
        })?;
        metrics::counter!("inventory_reservations_total", "outcome" => "released").increment(1);
        Ok(())
    }

    async fn settle(&self, order_id: AggregateId) -> Result<(), InventoryError> {
        self.lock_ledger()
            .retain(|(order, _), reservation| {
                *order != order_id || matches!(reservation, Reservation::Taking)
            });
        Ok(())
    }
}
