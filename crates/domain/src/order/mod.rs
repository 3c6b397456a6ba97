//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod repository;
mod status;
mod value_objects;

pub use aggregate::Order;
pub use commands::PlaceOrder;
pub use events::{
    CompensationStartedData, CompensationStepCompletedData, CompensationStepDeferredData,
    FailureReason, OrderConfirmedData, OrderEvent, OrderFailedData, OrderPlacedData,
    PaymentAuthorizedData, StockReservedData,
};
pub use repository::OrderRepository;
pub use status::{CompensationStep, OrderStatus, compensations_owed};
pub use value_objects::{BuyerId, LineItem, Money, ProductId, SellerId};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The order was already placed.
    #[error("Order already placed")]
    AlreadyPlaced,

    /// The order does not exist.
    #[error("Order not found")]
    NotFound,

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity {quantity} for product {product_id} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// Invalid price.
    #[error("Invalid price {price} for product {product_id}")]
    InvalidPrice { product_id: ProductId, price: Money },

    /// The authorized amount does not match the order total.
    #[error("Authorized amount {actual} does not match order total {expected}")]
    AmountMismatch { expected: Money, actual: Money },

    /// Order is not in the expected status.
    #[error("Invalid state transition: cannot {action} from {current_status}")]
    InvalidStateTransition {
        current_status: OrderStatus,
        action: &'static str,
    },

    /// The order is CONFIRMED or FAILED and cannot change.
    #[error("Order is already terminal ({status})")]
    AlreadyTerminal { status: OrderStatus },

    /// Compensation steps must finish before the order can fail.
    #[error("Compensation steps outstanding: {steps:?}")]
    CompensationOutstanding { steps: Vec<CompensationStep> },
}
