//! Operation entity and related types.

mod entity;
mod kind;
mod policy;
mod status;

pub use entity::{
    MAX_ERROR_MESSAGE_BYTES, NewOperation, Operation, OperationRecord, Payload, truncate_message,
};
pub use kind::{OperationType, ParseOperationTypeError};
pub use policy::{OperationPolicies, TypePolicy};
pub use status::{OperationStatus, ParseOperationStatusError};

use thiserror::Error;

/// Errors raised by the operation entity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// The requested transition is not an edge of the state machine.
    #[error("Invalid state transition: cannot {action} from {from} state")]
    InvalidStateTransition {
        from: OperationStatus,
        action: &'static str,
    },

    /// No policy is configured for the operation type.
    #[error("Unknown operation type: {0}")]
    UnknownOperationType(OperationType),

    /// The operation already used every retry its type allows.
    #[error("Retry limit exceeded: {attempts} of {limit} retries used")]
    RetryLimitExceeded { attempts: u32, limit: u32 },
}
