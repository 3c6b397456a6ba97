//! Commands for the order aggregate.

use common::{AggregateId, TenantId};

use super::{BuyerId, LineItem};

/// Command to record a new order before any stock is reserved.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    /// The order ID (random, or derived from an idempotency key).
    pub order_id: AggregateId,

    /// The tenant placing the order.
    pub tenant_id: TenantId,

    /// The buyer.
    pub buyer_id: BuyerId,

    /// Line items with catalog prices already snapshotted.
    pub items: Vec<LineItem>,

    /// Caller-supplied idempotency key, if any.
    pub idempotency_key: Option<String>,
}
