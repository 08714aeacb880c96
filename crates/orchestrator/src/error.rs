//! Orchestrator error types.

use common::OperationId;
use domain::OperationError;
use operation_store::RepositoryError;
use thiserror::Error;

/// Errors returned by the operation service and executor.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No operation with this id exists.
    #[error("Operation not found: {0}")]
    OperationNotFound(OperationId),

    /// The entity rejected the requested action.
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// The repository failed while performing `action`.
    #[error("Repository error while trying to {action}{}: {source}", display_target(.operation_id))]
    Repository {
        operation_id: Option<OperationId>,
        action: &'static str,
        #[source]
        source: RepositoryError,
    },

    /// A task is already registered for this operation in this process.
    #[error("Operation {0} already has a live task")]
    AlreadyRunning(OperationId),

    /// The executor no longer accepts work.
    #[error("Executor is shutting down")]
    ShuttingDown,
}

fn display_target(operation_id: &Option<OperationId>) -> String {
    operation_id
        .map(|id| format!(" operation {id}"))
        .unwrap_or_default()
}

impl ServiceError {
    pub(crate) fn repository(
        operation_id: Option<OperationId>,
        action: &'static str,
        source: RepositoryError,
    ) -> Self {
        match source {
            RepositoryError::NotFound(id) => ServiceError::OperationNotFound(id),
            source => ServiceError::Repository {
                operation_id,
                action,
                source,
            },
        }
    }

    /// Returns true if a versioned write lost a race.
    pub fn is_concurrent_modification(&self) -> bool {
        matches!(
            self,
            ServiceError::Repository { source, .. } if source.is_concurrent_modification()
        )
    }

    /// Returns true if the state machine rejected the action.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            ServiceError::Operation(OperationError::InvalidStateTransition { .. })
        )
    }
}

/// Convenience type alias for orchestrator results.
pub type Result<T> = std::result::Result<T, ServiceError>;
