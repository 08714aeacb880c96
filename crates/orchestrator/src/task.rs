//! Task bodies run by the executor.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use common::{OperationId, TenantId};
use domain::{OperationType, Payload};
use futures_util::future::BoxFuture;
use operation_store::RepositoryError;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Everything a task body gets to see about its operation.
///
/// The token fires on operator cancel, on deadline expiry and on executor
/// shutdown. Task code should check it at every await point that talks to the
/// outside world and return promptly once it fires.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub operation_id: OperationId,
    pub operation_type: OperationType,
    pub tenant_id: Option<TenantId>,
    pub parameters: Payload,
    pub deadline: Instant,
    token: CancellationToken,
}

impl TaskContext {
    pub fn new(
        operation_id: OperationId,
        operation_type: OperationType,
        tenant_id: Option<TenantId>,
        parameters: Payload,
        deadline: Instant,
        token: CancellationToken,
    ) -> Self {
        Self {
            operation_id,
            operation_type,
            tenant_id,
            parameters,
            deadline,
            token,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the task should stop.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns `Err(TaskError::Cancelled)` if the task should stop.
    pub fn checkpoint(&self) -> TaskResult<()> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> std::time::Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Parameter `key` as a string, or a `Failed` error naming it.
    pub fn str_param(&self, key: &str) -> TaskResult<&str> {
        self.parameters
            .get(key)
            .and_then(|value| value.as_str())
            .ok_or_else(|| TaskError::failed(format!("missing parameter '{key}'")))
    }
}

/// Ways a task body can end without a result.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The work failed; the message becomes the operation's error message.
    #[error("{0}")]
    Failed(String),

    /// The task observed its token and stopped.
    #[error("cancelled")]
    Cancelled,

    /// A repository call inside the task failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }
}

pub type TaskResult<T = Payload> = Result<T, TaskError>;

/// A reusable task body, shared across dispatches.
pub type TaskHandler = Arc<dyn Fn(TaskContext) -> BoxFuture<'static, TaskResult> + Send + Sync>;

/// Task bodies keyed by operation type.
///
/// Lets callers re-dispatch an operation after a retry without holding on to
/// the closure that first ran it.
#[derive(Clone, Default)]
pub struct TaskCatalog {
    handlers: HashMap<OperationType, TaskHandler>,
}

impl TaskCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `operation_type`, replacing any previous one.
    pub fn register<F, Fut>(mut self, operation_type: OperationType, handler: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let handler: TaskHandler = Arc::new(move |ctx| Box::pin(handler(ctx)));
        self.handlers.insert(operation_type, handler);
        self
    }

    pub fn get(&self, operation_type: OperationType) -> Option<TaskHandler> {
        self.handlers.get(&operation_type).cloned()
    }

    pub fn contains(&self, operation_type: OperationType) -> bool {
        self.handlers.contains_key(&operation_type)
    }
}

impl fmt::Debug for TaskCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCatalog")
            .field("operation_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
