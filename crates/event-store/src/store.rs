use std::sync::Arc;

use async_trait::async_trait;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

/// Precondition on a stream's version checked atomically with an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedVersion {
    /// No check; the batch still has to continue the stream without gaps.
    #[default]
    Any,
    /// The stream must have no events yet.
    NoStream,
    /// The stream must be exactly at this version.
    Exact(Version),
}

impl ExpectedVersion {
    /// Expectation for a writer that loaded the stream at `loaded`.
    pub fn after(loaded: Version) -> Self {
        if loaded == Version::initial() {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(loaded)
        }
    }

    /// Checks `current` against the expectation.
    pub fn check(self, aggregate_id: AggregateId, current: Version) -> Result<()> {
        let expected = match self {
            ExpectedVersion::Any => return Ok(()),
            ExpectedVersion::NoStream => Version::initial(),
            ExpectedVersion::Exact(version) => version,
        };
        if current == expected {
            Ok(())
        } else {
            Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current,
            })
        }
    }
}

/// Storage for per-aggregate event streams.
///
/// An append stores every event of the batch or none of them. It fails with
/// `ConcurrencyConflict` when the expectation does not hold or when another
/// writer claimed the same versions first.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch to one stream and returns the stream's new version.
    async fn append(&self, events: Vec<EventEnvelope>, expected: ExpectedVersion)
    -> Result<Version>;

    /// Returns the stream of `aggregate_id` in version order.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Returns the stream's version, or None if it has no events.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Lists every aggregate of a kind, in order of first append.
    async fn list_aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>>;
}

#[async_trait]
impl<T: EventStore + ?Sized> EventStore for Arc<T> {
    async fn append(
        &self,
        events: Vec<EventEnvelope>,
        expected: ExpectedVersion,
    ) -> Result<Version> {
        (**self).append(events, expected).await
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        (**self).get_events_for_aggregate(aggregate_id).await
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        (**self).get_aggregate_version(aggregate_id).await
    }

    async fn list_aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>> {
        (**self).list_aggregate_ids(aggregate_type).await
    }
}

/// Batch shape accepted by every store.
pub(crate) struct Batch<'a> {
    pub aggregate_id: AggregateId,
    pub aggregate_type: &'a str,
    pub first: Version,
    pub last: Version,
}

impl Batch<'_> {
    /// Fails unless the batch starts right after `current`.
    pub fn continues(&self, current: Version) -> Result<()> {
        if self.first == current.next() {
            Ok(())
        } else {
            Err(EventStoreError::ConcurrencyConflict {
                aggregate_id: self.aggregate_id,
                expected: Version::new(self.first.as_i64() - 1),
                actual: current,
            })
        }
    }
}

/// Checks that a batch is non-empty, targets one stream and has
/// consecutive versions.
pub(crate) fn inspect_batch(events: &[EventEnvelope]) -> Result<Batch<'_>> {
    let (Some(head), Some(tail)) = (events.first(), events.last()) else {
        return Err(EventStoreError::InvalidAppend("empty batch".to_string()));
    };

    for pair in events.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.aggregate_id != head.aggregate_id || next.aggregate_type != head.aggregate_type {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch for {} also targets {}",
                head.aggregate_id, next.aggregate_id
            )));
        }
        if next.version != prev.version.next() {
            return Err(EventStoreError::InvalidAppend(format!(
                "{} follows {}",
                next.version, prev.version
            )));
        }
    }

    Ok(Batch {
        aggregate_id: head.aggregate_id,
        aggregate_type: &head.aggregate_type,
        first: head.version,
        last: tail.version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TenantId;

    fn envelope(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
        EventEnvelope::new(
            "Order",
            aggregate_id,
            TenantId::new("engineering"),
            Version::new(version),
            "StockReserved",
            serde_json::json!({}),
        )
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(
            inspect_batch(&[]),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn version_gap_is_rejected() {
        let id = AggregateId::new();
        assert!(inspect_batch(&[envelope(id, 1), envelope(id, 3)]).is_err());
    }

    #[test]
    fn batch_spanning_two_orders_is_rejected() {
        let batch = [envelope(AggregateId::new(), 1), envelope(AggregateId::new(), 2)];
        assert!(inspect_batch(&batch).is_err());
    }

    #[test]
    fn consecutive_batch_reports_its_range() {
        let id = AggregateId::new();
        let events = [envelope(id, 4), envelope(id, 5), envelope(id, 6)];
        let batch = inspect_batch(&events).unwrap();
        assert_eq!(batch.aggregate_id, id);
        assert_eq!((batch.first, batch.last), (Version::new(4), Version::new(6)));
    }

    #[test]
    fn expectation_after_a_load() {
        let id = AggregateId::new();
        assert_eq!(ExpectedVersion::after(Version::initial()), ExpectedVersion::NoStream);
        assert!(ExpectedVersion::after(Version::new(2)).check(id, Version::new(2)).is_ok());

        let err = ExpectedVersion::NoStream
            .check(id, Version::first())
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(ExpectedVersion::Any.check(id, Version::new(9)).is_ok());
    }
}
