//! Traits shared by event-sourced aggregates.

use common::{AggregateId, TenantId};
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A past-tense fact recorded in an aggregate's stream.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Name stored next to the payload, e.g. `"StockReserved"`.
    fn event_type(&self) -> &'static str;
}

/// State rebuilt by folding its events.
///
/// Commands live on the concrete type and return events; `apply` is the only
/// way state changes and must accept any event the aggregate ever produced.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;
    type Error: std::error::Error + Send + Sync;

    /// Kind stored with every event, e.g. `"Order"`.
    fn aggregate_type() -> &'static str;

    /// None until the creating event has been applied.
    fn id(&self) -> Option<AggregateId>;

    /// None until the creating event has been applied.
    fn tenant_id(&self) -> Option<&TenantId>;

    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        events.into_iter().for_each(|event| self.apply(event));
    }

    /// Folds a stream read from the store.
    fn replay(stream: impl IntoIterator<Item = (Self::Event, Version)>) -> Self {
        let mut aggregate = Self::default();
        for (event, version) in stream {
            aggregate.apply(event);
            aggregate.set_version(version);
        }
        aggregate
    }
}
