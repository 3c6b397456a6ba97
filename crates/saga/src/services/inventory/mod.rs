//! Inventory store: tenant-scoped catalog lookup and atomic stock reservation.

mod memory;
mod postgres;

pub use memory::InMemoryInventory;
pub use postgres::PostgresInventory;

use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, TenantId};
use market_domain::{CatalogItem, ProductId};
use thiserror::Error;

/// Errors raised by an inventory store.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The product does not exist within the tenant.
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: ProductId },

    /// Not enough units left to reserve.
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The reservation for this order and product was already released.
    #[error("Reservation for order {order_id} and product {product_id} was already released")]
    ReservationReleased {
        order_id: AggregateId,
        product_id: ProductId,
    },

    /// The backing store failed.
    #[error("Inventory storage error: {0}")]
    Storage(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Stock holder for catalog items.
///
/// Reservations are tracked per `(order, product)`: reserving the same pair
/// twice takes stock once, and releasing a pair returns its units once.
/// Releasing a pair that was never reserved is a successful no-op.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Returns the items among `ids` owned by `tenant`; others are omitted.
    async fn find_by_ids_and_tenant(
        &self,
        ids: &[ProductId],
        tenant: &TenantId,
    ) -> Result<Vec<CatalogItem>, InventoryError>;

    /// Atomically takes `quantity` units if at least that many are available.
    async fn reserve(
        &self,
        order_id: AggregateId,
        tenant: &TenantId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), InventoryError>;

    /// Returns the units reserved for `(order_id, product_id)` to stock.
    async fn release(
        &self,
        order_id: AggregateId,
        tenant: &TenantId,
        product_id: ProductId,
    ) -> Result<(), InventoryError>;

    /// Drops bookkeeping for a CONFIRMED or FAILED order.
    ///
    /// Called once the order is terminal; no reserve or release for it
    /// follows.
    async fn settle(&self, order_id: AggregateId) -> Result<(), InventoryError>;
}

#[async_trait]
impl<T: InventoryStore + ?Sized> InventoryStore for Arc<T> {
    async fn find_by_ids_and_tenant(
        &self,
        ids: &[ProductId],
        tenant: &TenantId,
    ) -> Result<Vec<CatalogItem>, InventoryError> {
        (**self).find_by_ids_and_tenant(ids, tenant).await
    }

    async fn reserve(
        &self,
        order_id: AggregateId,
        tenant: &TenantId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        (**self).reserve(order_id, tenant, product_id, quantity).await
    }

    async fn release(
        &self,
        order_id: AggregateId,
        tenant: &TenantId,
        product_id: ProductId,
    ) -> Result<(), InventoryError> {
        (**self).release(order_id, tenant, product_id).await
    }

    async fn settle(&self, order_id: AggregateId) -> Result<(), InventoryError> {
        (**self).settle(order_id).await
    }
}
