//! Operation state machine.

use serde::{Deserialize, Serialize};

/// The status of an operation in its lifecycle.
///
/// State transitions:
/// ```text
///            start            complete
/// Pending ─────────► InProgress ─────────► Completed
///    │                   │
///    │                   ├── fail ──► Failed ── retry ──► Pending
///    │                   └── cancel ─► Cancelled
///    └── cancel ─────────────────────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Accepted and persisted, waiting for an executor.
    #[default]
    Pending,

    /// An executor task is working on it.
    InProgress,

    /// Finished successfully (terminal state).
    Completed,

    /// Finished with an error; only a retry leaves this state.
    Failed,

    /// Stopped on request (terminal state).
    Cancelled,
}

impl OperationStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [OperationStatus; 5] = [
        OperationStatus::Pending,
        OperationStatus::InProgress,
        OperationStatus::Completed,
        OperationStatus::Failed,
        OperationStatus::Cancelled,
    ];

    /// Returns true if an executor may start working in this status.
    pub fn can_start(&self) -> bool {
        matches!(self, OperationStatus::Pending)
    }

    /// Returns true if the operation can complete in this status.
    pub fn can_complete(&self) -> bool {
        matches!(self, OperationStatus::InProgress)
    }

    /// Returns true if the operation can fail in this status.
    pub fn can_fail(&self) -> bool {
        matches!(self, OperationStatus::InProgress)
    }

    /// Returns true if the operation can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OperationStatus::Pending | OperationStatus::InProgress)
    }

    /// Returns true if the operation can be sent back to pending.
    pub fn can_retry(&self) -> bool {
        matches!(self, OperationStatus::Failed)
    }

    /// Returns true if this is a terminal state (no outgoing edges).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Cancelled)
    }

    /// Returns true once the operation has stopped running, whether for good
    /// or pending a retry. These are the statuses that carry `completed_at`.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }

    /// Returns true if `self → next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        match next {
            OperationStatus::Pending => self.can_retry(),
            OperationStatus::InProgress => self.can_start(),
            OperationStatus::Completed => self.can_complete(),
            OperationStatus::Failed => self.can_fail(),
            OperationStatus::Cancelled => self.can_cancel(),
        }
    }

    /// Returns the status name as stored and reported.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::InProgress => "in_progress",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation status: {0}")]
pub struct ParseOperationStatusError(pub String);

impl std::str::FromStr for OperationStatus {
    type Err = ParseOperationStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseOperationStatusError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(OperationStatus::default(), OperationStatus::Pending);
    }

    #[test]
    fn test_only_diagram_edges_are_valid() {
        use OperationStatus::*;
        let valid = [
            (Pending, InProgress),
            (Pending, Cancelled),
            (InProgress, Completed),
            (InProgress, Failed),
            (InProgress, Cancelled),
            (Failed, Pending),
        ];

        for from in OperationStatus::ALL {
            for to in OperationStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    valid.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_and_settled_states() {
        assert!(!OperationStatus::Pending.is_terminal());
        assert!(!OperationStatus::InProgress.is_terminal());
        assert!(OperationStatus::Completed.is_terminal());
        assert!(!OperationStatus::Failed.is_terminal());
        assert!(OperationStatus::Cancelled.is_terminal());

        assert!(!OperationStatus::Pending.is_settled());
        assert!(!OperationStatus::InProgress.is_settled());
        assert!(OperationStatus::Failed.is_settled());
    }

    #[test]
    fn test_display_and_parse() {
        for status in OperationStatus::ALL {
            let parsed: OperationStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("running".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn test_serialization_uses_snake_case() {
        let json = serde_json::to_string(&OperationStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
