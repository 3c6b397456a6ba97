//! Checkout error types.

use common::AggregateId;
use market_domain::{CompensationStep, DomainError, FailureReason, OrderStatus, ProductId};
use thiserror::Error;

/// Errors surfaced by the checkout saga.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The request violates a precondition (empty cart, zero quantity, ...).
    #[error("Invalid checkout request: {0}")]
    InvalidRequest(String),

    /// A product is unknown within the requesting tenant.
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: ProductId },

    /// A line item could not be reserved.
    #[error("Insufficient stock for product {product_id}")]
    InsufficientStock { product_id: ProductId },

    /// The payment service rejected the authorization.
    #[error("Payment declined: {reason}")]
    PaymentDeclined { reason: String },

    /// The payment service could not be reached within the retry budget.
    #[error("Payment unavailable: {reason}")]
    PaymentUnavailable { reason: String },

    /// The inventory store failed.
    #[error("Inventory unavailable: {reason}")]
    InventoryUnavailable { reason: String },

    /// The order is already CONFIRMED or FAILED.
    #[error("Saga for order {order_id} is already terminal ({status})")]
    SagaAlreadyTerminal {
        order_id: AggregateId,
        status: OrderStatus,
    },

    /// The idempotency key resolves to an order placed by someone else.
    #[error("Idempotency key already used for order {order_id}")]
    IdempotencyKeyReused { order_id: AggregateId },

    /// The checkout was given up for a reason outside inventory and payment,
    /// such as a step that could not be recorded.
    #[error("Checkout abandoned: {reason}")]
    Abandoned { reason: String },

    /// Another attempt with the same idempotency key has not finished.
    #[error("Checkout {order_id} is already in progress")]
    CheckoutInProgress { order_id: AggregateId },

    /// No order exists with this ID for the tenant.
    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    /// A compensation step could not complete; recovery will resume it.
    #[error("Compensation step {step} for order {order_id} did not complete: {reason}")]
    CompensationIncomplete {
        order_id: AggregateId,
        step: CompensationStep,
        reason: String,
    },

    /// The order event log failed.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl CheckoutError {
    /// Short label used in metrics.
    pub fn label(&self) -> &'static str {
        match self {
            CheckoutError::InvalidRequest(_) => "invalid_request",
            CheckoutError::ProductNotFound { .. } => "product_not_found",
            CheckoutError::InsufficientStock { .. } => "insufficient_stock",
            CheckoutError::PaymentDeclined { .. } => "payment_declined",
            CheckoutError::PaymentUnavailable { .. } => "payment_unavailable",
            CheckoutError::InventoryUnavailable { .. } => "inventory_unavailable",
            CheckoutError::SagaAlreadyTerminal { .. } => "already_terminal",
            CheckoutError::IdempotencyKeyReused { .. } => "idempotency_key_reused",
            CheckoutError::Abandoned { .. } => "abandoned",
            CheckoutError::CheckoutInProgress { .. } => "in_progress",
            CheckoutError::OrderNotFound(_) => "order_not_found",
            CheckoutError::CompensationIncomplete { .. } => "compensation_incomplete",
            CheckoutError::Domain(_) => "domain",
        }
    }
}

impl From<FailureReason> for CheckoutError {
    /// Rebuilds the typed error recorded when the order failed.
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::InsufficientStock { product_id } => {
                CheckoutError::InsufficientStock { product_id }
            }
            FailureReason::PaymentDeclined { reason } => CheckoutError::PaymentDeclined { reason },
            FailureReason::PaymentUnavailable { reason } => {
                CheckoutError::PaymentUnavailable { reason }
            }
            FailureReason::InventoryUnavailable { reason } => {
                CheckoutError::InventoryUnavailable { reason }
            }
            FailureReason::Abandoned { reason } => CheckoutError::Abandoned { reason },
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_reason_round_trips_to_error() {
        let product_id = ProductId::new();
        let err = CheckoutError::from(FailureReason::InsufficientStock { product_id });
        assert!(matches!(err, CheckoutError::InsufficientStock { product_id: p } if p == product_id));

        let err = CheckoutError::from(FailureReason::PaymentDeclined {
            reason: "card expired".to_string(),
        });
        assert_eq!(err.to_string(), "Payment declined: card expired");
    }

    #[test]
    fn test_abandoned_is_not_reported_as_a_payment_failure() {
        let err = CheckoutError::from(FailureReason::Abandoned {
            reason: "event log unreachable".to_string(),
        });
        assert!(matches!(err, CheckoutError::Abandoned { ref reason } if reason == "event log unreachable"));
        assert_eq!(err.label(), "abandoned");
    }
}
