use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{EventStore, ExpectedVersion, inspect_batch};
use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

#[derive(Default)]
struct Log {
    streams: HashMap<AggregateId, Vec<EventEnvelope>>,
    /// `(id, aggregate_type)` in order of first append.
    created: Vec<(AggregateId, String)>,
}

impl Log {
    fn version_of(&self, aggregate_id: AggregateId) -> Version {
        self.streams
            .get(&aggregate_id)
            .and_then(|stream| stream.last())
            .map_or(Version::initial(), |e| e.version)
    }
}

/// Event store kept in process memory.
///
/// Used by tests and by the service when no database is configured.
/// Appends are serialized by a single write lock.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total events across all streams.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.streams.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        events: Vec<EventEnvelope>,
        expected: ExpectedVersion,
    ) -> Result<Version> {
        let batch = inspect_batch(&events)?;
        let (aggregate_id, last) = (batch.aggregate_id, batch.last);
        let aggregate_type = batch.aggregate_type.to_string();

        let mut log = self.log.write().await;
        let current = log.version_of(aggregate_id);
        expected.check(aggregate_id, current)?;
        batch.continues(current)?;

        if current == Version::initial() {
            log.created.push((aggregate_id, aggregate_type));
        }
        log.streams.entry(aggregate_id).or_default().extend(events);
        metrics::counter!("event_store_appends_total").increment(1);

        Ok(last)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log.streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let log = self.log.read().await;
        Ok(log
            .streams
            .contains_key(&aggregate_id)
            .then(|| log.version_of(aggregate_id)))
    }

    async fn list_aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>> {
        let log = self.log.read().await;
        Ok(log
            .created
            .iter()
            .filter(|(_, kind)| kind == aggregate_type)
            .map(|(id, _)| *id)
            .collect())
    }
}
