use thiserror::Error;

use crate::{AggregateId, Version};

#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Another writer moved the stream past the version the caller loaded.
    #[error("Stream {aggregate_id} is at {actual}, expected {expected}")]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// The batch is empty, spans several streams, or has version gaps.
    #[error("Rejected append: {0}")]
    InvalidAppend(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Payload encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, EventStoreError>;
