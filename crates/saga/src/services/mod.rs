//! Collaborators driven by the checkout saga, each behind a trait with an
//! in-memory implementation for tests and local runs.

pub mod inventory;
pub mod notifier;
pub mod payment;
pub mod publisher;

pub use inventory::{InMemoryInventory, InventoryError, InventoryStore, PostgresInventory};
pub use notifier::{HttpNotifier, InMemoryNotifier, NotificationEvent, Notifier, NotifyError};
pub use payment::{
    AuthorizeRequest, CancelBehavior, HttpPaymentGateway, InMemoryPaymentGateway,
    PaymentBehavior, PaymentError, PaymentGateway, PaymentRecord, PaymentStatus,
};
pub use publisher::{
    ConfirmedItem, Delivery, EXCHANGE, EventPublisher, InMemoryEventBus,
    ORDER_CONFIRMED_ROUTING_KEY, OrderConfirmedMessage, PublishError,
};
