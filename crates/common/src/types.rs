use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for identifiers derived from caller-supplied idempotency keys.
const IDEMPOTENCY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2d3e_9a47_4b0e_8c15_3e7d_a2b4_91f0);

/// Identity of an event stream; for orders it is also the saga correlation ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

impl AggregateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Derives a stable ID from a tenant, the caller and an idempotency key.
    ///
    /// The same `(tenant, caller, key)` triple always yields the same ID, so a
    /// retried request lands on the aggregate created by the first attempt,
    /// while two callers reusing a key never share one.
    pub fn from_idempotency_key(tenant: &TenantId, caller: Uuid, key: &str) -> Self {
        // Length prefix keeps ("a:b", "c") and ("a", "b:c") apart; the caller
        // UUID is fixed width.
        let name = format!(
            "{}:{}:{}:{}",
            tenant.as_str().len(),
            tenant.as_str(),
            caller.as_hyphenated(),
            key
        );
        Self(Uuid::new_v5(&IDEMPOTENCY_NAMESPACE, name.as_bytes()))
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AggregateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<AggregateId> for Uuid {
    fn from(id: AggregateId) -> Self {
        id.0
    }
}

/// Identifier of the tenant (faculty, campus) that owns a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_id_new_creates_unique_ids() {
        let id1 = AggregateId::new();
        let id2 = AggregateId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn aggregate_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = AggregateId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn idempotency_key_derivation_is_stable() {
        let tenant = TenantId::new("engineering");
        let caller = Uuid::new_v4();
        let a = AggregateId::from_idempotency_key(&tenant, caller, "cart-42");
        let b = AggregateId::from_idempotency_key(&tenant, caller, "cart-42");
        assert_eq!(a, b);
    }

    #[test]
    fn idempotency_key_is_scoped_by_tenant() {
        let caller = Uuid::new_v4();
        let a = AggregateId::from_idempotency_key(&TenantId::new("engineering"), caller, "cart-42");
        let b = AggregateId::from_idempotency_key(&TenantId::new("medicine"), caller, "cart-42");
        assert_ne!(a, b);
    }

    #[test]
    fn idempotency_key_is_scoped_by_caller() {
        let tenant = TenantId::new("engineering");
        let a = AggregateId::from_idempotency_key(&tenant, Uuid::new_v4(), "1");
        let b = AggregateId::from_idempotency_key(&tenant, Uuid::new_v4(), "1");
        assert_ne!(a, b);
    }

    #[test]
    fn tenant_and_key_boundaries_do_not_collide() {
        let caller = Uuid::nil();
        let a = AggregateId::from_idempotency_key(&TenantId::new("a:b"), caller, "c");
        let b = AggregateId::from_idempotency_key(&TenantId::new("a"), caller, "b:c");
        assert_ne!(a, b);
    }

    #[test]
    fn tenant_id_serializes_as_plain_string() {
        let tenant = TenantId::new("engineering");
        let json = serde_json::to_string(&tenant).unwrap();
        assert_eq!(json, "\"engineering\"");
    }
}
