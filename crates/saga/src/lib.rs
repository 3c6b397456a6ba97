//! Checkout saga for the campus marketplace.
//!
//! A checkout reserves stock for every line, authorizes one payment for the
//! whole cart and commits the order, or compensates in reverse order:
//!
//! ```text
//! PENDING ──reserve──▶ STOCK_RESERVED ──authorize──▶ PAYMENT_AUTHORIZED ──▶ CONFIRMED
//!    │                      │                              │
//!    └──────────────────────┴──────────────┬───────────────┘
//!                                          ▼
//!                    COMPENSATING (cancel payment, release stock) ──▶ FAILED
//! ```
//!
//! The order's event log is the saga's step log, so a crashed checkout can be
//! compensated from its last recorded status. Confirmed orders are published
//! to the event bus in the background and the buyer is notified on a best
//! effort basis.

pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod notification;
pub mod payment_client;
pub mod publish_queue;
pub mod request;
pub mod retry;
pub mod services;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState};
pub use config::SagaConfig;
pub use coordinator::{CheckoutSaga, RecoveryReport};
pub use error::{CheckoutError, Result};
pub use notification::NotificationSidecar;
pub use payment_client::PaymentClient;
pub use publish_queue::PublishQueue;
pub use request::{CheckoutLine, CheckoutRequest};
pub use retry::RetryPolicy;
pub use services::{
    AuthorizeRequest, CancelBehavior, EventPublisher, HttpNotifier, HttpPaymentGateway,
    InMemoryEventBus, InMemoryInventory, InMemoryNotifier, InMemoryPaymentGateway,
    InventoryError, InventoryStore, NotificationEvent, Notifier, OrderConfirmedMessage,
    PaymentBehavior, PaymentError, PaymentGateway, PaymentRecord, PaymentStatus,
    PostgresInventory, PublishError,
};
