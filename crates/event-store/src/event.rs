//! Stored events and stream versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{AggregateId, Result, TenantId};

/// Position of an event within its aggregate's stream.
///
/// A stream with no events is at version 0; its first event is version 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version of a stream with no events.
    pub fn initial() -> Self {
        Self(0)
    }

    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// One recorded fact about an aggregate, with the routing data needed to
/// store and replay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,

    /// Aggregate kind, e.g. `"Order"`.
    pub aggregate_type: String,
    pub tenant_id: TenantId,
    pub version: Version,

    /// Event name, e.g. `"StockReserved"`.
    pub event_type: String,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Wraps an already-encoded payload, stamping a fresh ID and the current time.
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: AggregateId,
        tenant_id: TenantId,
        version: Version,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            tenant_id,
            version,
            event_type: event_type.into(),
            payload,
            recorded_at: Utc::now(),
        }
    }

    /// Serializes `event` as the payload.
    pub fn encode<E: Serialize>(
        aggregate_type: impl Into<String>,
        aggregate_id: AggregateId,
        tenant_id: TenantId,
        version: Version,
        event_type: impl Into<String>,
        event: &E,
    ) -> Result<Self> {
        let payload = serde_json::to_value(event)?;
        Ok(Self::new(
            aggregate_type,
            aggregate_id,
            tenant_id,
            version,
            event_type,
            payload,
        ))
    }

    /// Deserializes the payload.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<E> {
        Ok(E::deserialize(&self.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventStoreError;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reserved {
        product: String,
        quantity: u32,
    }

    #[test]
    fn versions_count_up_from_an_empty_stream() {
        assert_eq!(Version::initial().next(), Version::first());
        assert!(Version::first() < Version::new(2));
        assert_eq!(Version::new(7).to_string(), "v7");
    }

    #[test]
    fn payload_decodes_to_the_encoded_event() {
        let event = Reserved {
            product: "lab coat".to_string(),
            quantity: 2,
        };
        let envelope = EventEnvelope::encode(
            "Order",
            AggregateId::new(),
            TenantId::new("engineering"),
            Version::first(),
            "StockReserved",
            &event,
        )
        .unwrap();

        assert_eq!(envelope.payload["quantity"], 2);
        assert_eq!(envelope.decode::<Reserved>().unwrap(), event);
    }

    #[test]
    fn decoding_into_the_wrong_shape_fails() {
        let envelope = EventEnvelope::new(
            "Order",
            AggregateId::new(),
            TenantId::new("engineering"),
            Version::first(),
            "OrderPlaced",
            serde_json::json!({ "unexpected": true }),
        );

        assert!(matches!(
            envelope.decode::<Reserved>(),
            Err(EventStoreError::Serialization(_))
        ));
    }
}
