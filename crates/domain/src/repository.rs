//! Event-sourced repository: load an aggregate, run a command, append its events.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{EventEnvelope, EventStore, ExpectedVersion, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Result of a command executed through the repository.
#[derive(Debug)]
pub struct Executed<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The version of the aggregate after the command.
    pub new_version: Version,
}

/// Runs commands against aggregates stored as event streams.
///
/// Each command sees the state replayed from the store and its events are
/// appended only if nobody else wrote to the stream in between.
pub struct EventSourcedRepository<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> EventSourcedRepository<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replays an aggregate, returning a default instance if it has no events.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let stream = self
            .store
            .get_events_for_aggregate(aggregate_id)
            .await?
            .into_iter()
            .map(|envelope| -> Result<_, DomainError> {
                Ok((envelope.decode::<A::Event>()?, envelope.version))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(A::replay(stream))
    }

    /// Loads an aggregate, returning None if it doesn't exist.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Executes a command and persists the resulting events.
    ///
    /// The command function receives the current state and returns the events
    /// to record, or an error. An empty event list persists nothing.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<Executed<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        let current_version = aggregate.version();

        let events = command_fn(&aggregate)?;
        if events.is_empty() {
            return Ok(Executed {
                aggregate,
                events,
                new_version: current_version,
            });
        }

        // The tenant is only known once the creation event has been applied.
        aggregate.apply_events(events.iter().cloned());
        let envelopes = self.build_envelopes(&aggregate, aggregate_id, current_version, &events)?;

        let new_version = self
            .store
            .append(envelopes, ExpectedVersion::after(current_version))
            .await?;
        aggregate.set_version(new_version);

        tracing::debug!(
            aggregate_type = A::aggregate_type(),
            %aggregate_id,
            version = %new_version,
            count = events.len(),
            "events appended"
        );

        Ok(Executed {
            aggregate,
            events,
            new_version,
        })
    }

    fn build_envelopes(
        &self,
        aggregate: &A,
        aggregate_id: AggregateId,
        current_version: Version,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let tenant_id = aggregate
            .tenant_id()
            .ok_or(DomainError::Untenanted {
                aggregate_type: A::aggregate_type(),
                aggregate_id,
            })?;

        let mut version = current_version;
        events
            .iter()
            .map(|event| {
                version = version.next();
                Ok(EventEnvelope::encode(
                    A::aggregate_type(),
                    aggregate_id,
                    tenant_id.clone(),
                    version,
                    event.event_type(),
                    event,
                )?)
            })
            .collect()
    }
}
