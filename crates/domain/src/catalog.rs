//! Catalog items as seen by the checkout saga.

use common::TenantId;
use serde::{Deserialize, Serialize};

use crate::order::{LineItem, Money, ProductId, SellerId};

/// A catalog item with its available stock.
///
/// Stock never goes negative and every mutation bumps `revision`; both are
/// owned by the inventory store, which is the only writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Item identity.
    pub id: ProductId,

    /// Tenant that owns the listing.
    pub tenant_id: TenantId,

    /// Seller that listed the item.
    pub seller_id: SellerId,

    /// Display name.
    pub name: String,

    /// Longer description.
    pub description: String,

    /// Current unit price.
    pub unit_price: Money,

    /// Units available for reservation.
    pub stock: u32,

    /// Monotonic stamp bumped on every stock mutation.
    pub revision: u64,
}

impl CatalogItem {
    /// Creates a listing with a fresh identity at revision 0.
    pub fn new(
        tenant_id: TenantId,
        seller_id: SellerId,
        name: impl Into<String>,
        unit_price: Money,
        stock: u32,
    ) -> Self {
        Self {
            id: ProductId::new(),
            tenant_id,
            seller_id,
            name: name.into(),
            description: String::new(),
            unit_price,
            stock,
            revision: 0,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Snapshots the item's current price into an order line.
    pub fn line_item(&self, quantity: u32) -> LineItem {
        LineItem {
            product_id: self.id,
            seller_id: self.seller_id,
            product_name: self.name.clone(),
            quantity,
            unit_price: self.unit_price,
        }
    }
}
