//! Order domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, TenantId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{BuyerId, CompensationStep, LineItem, Money, OrderStatus, ProductId};

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was recorded, before any stock was touched.
    OrderPlaced(OrderPlacedData),

    /// Stock for every line item was reserved.
    StockReserved(StockReservedData),

    /// The payment service authorized the order total.
    PaymentAuthorized(PaymentAuthorizedData),

    /// Order reached its commit point.
    OrderConfirmed(OrderConfirmedData),

    /// A forward step failed and compensation began.
    CompensationStarted(CompensationStartedData),

    /// One compensation step finished.
    CompensationStepCompleted(CompensationStepCompletedData),

    /// A compensation step was handed to a background retry so the rest of
    /// compensation could proceed.
    CompensationStepDeferred(CompensationStepDeferredData),

    /// Every owed compensation ran; the order is finished.
    OrderFailed(OrderFailedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::StockReserved(_) => "StockReserved",
            OrderEvent::PaymentAuthorized(_) => "PaymentAuthorized",
            OrderEvent::OrderConfirmed(_) => "OrderConfirmed",
            OrderEvent::CompensationStarted(_) => "CompensationStarted",
            OrderEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            OrderEvent::CompensationStepDeferred(_) => "CompensationStepDeferred",
            OrderEvent::OrderFailed(_) => "OrderFailed",
        }
    }
}

/// Data for OrderPlaced event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    /// The order ID, also the saga correlation ID.
    pub order_id: AggregateId,

    /// The tenant the order belongs to.
    pub tenant_id: TenantId,

    /// The buyer.
    pub buyer_id: BuyerId,

    /// Line items with prices snapshotted from the catalog.
    pub items: Vec<LineItem>,

    /// Sum of line item subtotals.
    pub total_amount: Money,

    /// Caller-supplied idempotency key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    /// When the order was placed.
    pub placed_at: DateTime<Utc>,
}

/// Data for StockReserved event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockReservedData {
    /// When the last reservation succeeded.
    pub reserved_at: DateTime<Utc>,
}

/// Data for PaymentAuthorized event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAuthorizedData {
    /// Payment record ID on the payment service.
    pub payment_id: String,

    /// Provider-side reference.
    pub provider_reference: String,

    /// The authorized amount.
    pub amount: Money,

    /// When the authorization was recorded.
    pub authorized_at: DateTime<Utc>,
}

/// Data for OrderConfirmed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmedData {
    /// When the order was confirmed.
    pub confirmed_at: DateTime<Utc>,
}

/// Data for CompensationStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationStartedData {
    /// The status compensation was entered from.
    pub from_status: OrderStatus,

    /// Why the saga is being unwound.
    pub reason: FailureReason,

    /// When compensation started.
    pub started_at: DateTime<Utc>,
}

/// Data for CompensationStepCompleted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationStepCompletedData {
    /// The step that completed.
    pub step: CompensationStep,

    /// When it completed.
    pub completed_at: DateTime<Utc>,
}

/// Data for CompensationStepDeferred event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationStepDeferredData {
    /// The step left to the background retry.
    pub step: CompensationStep,

    /// Why it could not complete inline.
    pub reason: String,

    /// When it was deferred.
    pub deferred_at: DateTime<Utc>,
}

/// Data for OrderFailed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFailedData {
    /// The recorded failure, returned to retried checkouts.
    pub reason: FailureReason,

    /// When the order failed.
    pub failed_at: DateTime<Utc>,
}

/// Why a checkout saga did not confirm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// A line item could not be reserved.
    InsufficientStock { product_id: ProductId },

    /// The payment service explicitly rejected the authorization.
    PaymentDeclined { reason: String },

    /// The payment service could not be reached in time.
    PaymentUnavailable { reason: String },

    /// The inventory store failed while reserving.
    InventoryUnavailable { reason: String },

    /// Compensated by recovery or an operator without a forward failure.
    Abandoned { reason: String },
}

impl FailureReason {
    /// Short label used as a metrics dimension.
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::InsufficientStock { .. } => "insufficient_stock",
            FailureReason::PaymentDeclined { .. } => "payment_declined",
            FailureReason::PaymentUnavailable { .. } => "payment_unavailable",
            FailureReason::InventoryUnavailable { .. } => "inventory_unavailable",
            FailureReason::Abandoned { .. } => "abandoned",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::InsufficientStock { product_id } => {
                write!(f, "insufficient stock for product {product_id}")
            }
            FailureReason::PaymentDeclined { reason } => write!(f, "payment declined: {reason}"),
            FailureReason::PaymentUnavailable { reason } => {
                write!(f, "payment unavailable: {reason}")
            }
            FailureReason::InventoryUnavailable { reason } => {
                write!(f, "inventory unavailable: {reason}")
            }
            FailureReason::Abandoned { reason } => write!(f, "abandoned: {reason}"),
        }
    }
}
