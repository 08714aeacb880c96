use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a persisted operation.
///
/// Assigned by the repository on create from a monotonic sequence and never
/// reused. Wraps the raw integer so it cannot be confused with versions or
/// retry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(i64);

impl OperationId {
    /// Creates an operation ID from a raw sequence value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw sequence value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for OperationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<i64> for OperationId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<OperationId> for i64 {
    fn from(id: OperationId) -> Self {
        id.0
    }
}

/// Identifier of the tenant an operation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Creates a new random tenant ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a tenant ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TenantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for TenantId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Row version used for optimistic concurrency control.
///
/// A freshly created operation is at version 1; every committed update
/// advances it by one. Writers present the version they loaded and the
/// repository rejects the write if the row has moved on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version of a row that has not been persisted yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version assigned on create.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_id_parses_from_path_segment() {
        let id: OperationId = "42".parse().unwrap();
        assert_eq!(id, OperationId::new(42));
        assert!("abc".parse::<OperationId>().is_err());
    }

    #[test]
    fn operation_id_serializes_as_plain_integer() {
        let json = serde_json::to_string(&OperationId::new(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn tenant_id_new_creates_unique_ids() {
        assert_ne!(TenantId::new(), TenantId::new());
    }

    #[test]
    fn tenant_id_serialization_roundtrip() {
        let id = TenantId::new();
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: TenantId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn version_ordering() {
        assert_eq!(Version::initial().next(), Version::first());
        assert!(Version::first() < Version::new(2));
        assert_eq!(Version::new(5).as_i64(), 5);
    }
}
