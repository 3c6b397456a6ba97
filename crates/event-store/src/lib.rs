//! Append-only event log with optimistic concurrency.
//!
//! Aggregates in the marketplace persist every state transition here before
//! acting on it, which makes the log the source of truth for crash recovery.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{AggregateId, TenantId};
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{EventStore, ExpectedVersion};
