use event_store::EventStoreError;
use thiserror::Error;

use crate::order::OrderError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// The order rejected a command for its current status.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// A command produced events for an aggregate that has no tenant yet.
    #[error("{aggregate_type} {aggregate_id} has no tenant")]
    Untenanted {
        aggregate_type: &'static str,
        aggregate_id: common::AggregateId,
    },
}

impl DomainError {
    /// True when another writer appended to the same stream first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_conflict())
    }
}
