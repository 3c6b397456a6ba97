//! Domain layer for the marketplace checkout.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits plus an event-sourced repository
//! - The catalog item model consumed by the inventory store
//! - The Order aggregate, whose status doubles as the checkout saga's step log

pub mod aggregate;
pub mod catalog;
pub mod error;
pub mod order;
pub mod repository;

pub use aggregate::{Aggregate, DomainEvent};
pub use catalog::CatalogItem;
pub use error::DomainError;
pub use order::{
    BuyerId, CompensationStep, FailureReason, LineItem, Money, Order, OrderError, OrderEvent,
    OrderRepository, OrderStatus, PlaceOrder, ProductId, SellerId, compensations_owed,
};
pub use repository::{EventSourcedRepository, Executed};
