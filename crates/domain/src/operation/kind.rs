//! Catalogue of operation types.

use serde::{Deserialize, Serialize};

/// The lifecycle action an operation represents.
///
/// Serialized by its dotted name (`tenant.create`, ...). The core only cares
/// about membership: policies and task handlers are looked up by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    #[serde(rename = "tenant.create")]
    TenantCreate,
    #[serde(rename = "tenant.delete")]
    TenantDelete,
    #[serde(rename = "tenant.update")]
    TenantUpdate,
    #[serde(rename = "tenant.suspend")]
    TenantSuspend,
    #[serde(rename = "tenant.resume")]
    TenantResume,
    #[serde(rename = "tenant.migrate_region")]
    TenantMigrateRegion,
}

impl OperationType {
    /// Every known operation type.
    pub const ALL: [OperationType; 6] = [
        OperationType::TenantCreate,
        OperationType::TenantDelete,
        OperationType::TenantUpdate,
        OperationType::TenantSuspend,
        OperationType::TenantResume,
        OperationType::TenantMigrateRegion,
    ];

    /// Returns the dotted type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::TenantCreate => "tenant.create",
            OperationType::TenantDelete => "tenant.delete",
            OperationType::TenantUpdate => "tenant.update",
            OperationType::TenantSuspend => "tenant.suspend",
            OperationType::TenantResume => "tenant.resume",
            OperationType::TenantMigrateRegion => "tenant.migrate_region",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown type name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation type: {0}")]
pub struct ParseOperationTypeError(pub String);

impl std::str::FromStr for OperationType {
    type Err = ParseOperationTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseOperationTypeError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_every_dotted_name() {
        for kind in OperationType::ALL {
            assert_eq!(kind.as_str().parse::<OperationType>().unwrap(), kind);
        }
    }

    #[test]
    fn parse_rejects_unknown_names() {
        let err = "tenant.explode".parse::<OperationType>().unwrap_err();
        assert_eq!(err.0, "tenant.explode");
    }

    #[test]
    fn serde_matches_display() {
        let json = serde_json::to_string(&OperationType::TenantMigrateRegion).unwrap();
        assert_eq!(json, "\"tenant.migrate_region\"");
        let back: OperationType = serde_json::from_str("\"tenant.delete\"").unwrap();
        assert_eq!(back, OperationType::TenantDelete);
    }
}
