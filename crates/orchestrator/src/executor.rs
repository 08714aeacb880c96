//! Drives dispatched operations from pending to a settled state.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::OperationId;
use domain::Payload;
use operation_store::OperationRepository;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{Result, ServiceError};
use crate::service::OperationService;
use crate::task::{TaskContext, TaskError, TaskResult};

/// Error message for operations that ran past their type's deadline.
pub const TIMEOUT_MESSAGE: &str = "timeout";

/// Error message for operations interrupted by executor shutdown.
pub const SHUTDOWN_MESSAGE: &str = "interrupted: executor shutting down";

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How long a cancelled or timed-out task may take to return before it
    /// is aborted.
    pub cancel_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cancel_grace: Duration::from_secs(5),
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_grace(mut self, cancel_grace: Duration) -> Self {
        self.cancel_grace = cancel_grace;
        self
    }
}

/// How a task run ended, before it is written back.
#[derive(Debug)]
enum Outcome {
    Succeeded(Payload),
    Failed(String),
    Panicked(String),
    /// The token fired: operator cancel or executor shutdown.
    Interrupted,
    TimedOut,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Succeeded(_) => "succeeded",
            Outcome::Failed(_) => "failed",
            Outcome::Panicked(_) => "panicked",
            Outcome::Interrupted => "interrupted",
            Outcome::TimedOut => "timed_out",
        }
    }
}

/// Runs task bodies for dispatched operations on the tokio runtime.
///
/// Each dispatch registers a cancel handle, then spawns a worker that starts
/// the operation, runs the task under the type's deadline and writes the
/// outcome back through the service. Panics in task code are caught at the
/// task boundary and recorded as failures.
pub struct OperationExecutor<R: OperationRepository> {
    service: Arc<OperationService<R>>,
    config: ExecutorConfig,
}

impl<R: OperationRepository> Clone for OperationExecutor<R> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            config: self.config.clone(),
        }
    }
}

impl<R: OperationRepository + 'static> OperationExecutor<R> {
    pub fn new(service: Arc<OperationService<R>>, config: ExecutorConfig) -> Self {
        Self { service, config }
    }

    pub fn service(&self) -> &Arc<OperationService<R>> {
        &self.service
    }

    /// Number of tasks currently registered in this process.
    pub fn live_tasks(&self) -> usize {
        self.service.registry().len()
    }

    /// Interrupts every live task. Their operations fail with
    /// [`SHUTDOWN_MESSAGE`]; later dispatches are refused.
    pub fn shutdown(&self) {
        tracing::info!(live_tasks = self.live_tasks(), "executor shutting down");
        self.service.registry().shutdown();
    }

    /// Runs `task` for the pending operation `id` in the background.
    ///
    /// Returns as soon as the cancel handle is registered and the worker is
    /// spawned; must be called from within a tokio runtime.
    pub fn dispatch<F, Fut>(&self, id: OperationId, task: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let registry = self.service.registry();
        if registry.is_shutting_down() {
            return Err(ServiceError::ShuttingDown);
        }
        let token = registry
            .register(id)
            .ok_or(ServiceError::AlreadyRunning(id))?;

        let span = tracing::info_span!(
            "operation.execute",
            operation_id = %id,
            r#type = tracing::field::Empty,
        );
        let worker = self.clone();
        Ok(tokio::spawn(
            async move {
                worker.drive(id, token, task).await;
            }
            .instrument(span),
        ))
    }

    async fn drive<F, Fut>(&self, id: OperationId, token: CancellationToken, task: F)
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let operation = match self.service.start_operation(id).await {
            Ok(operation) => operation,
            Err(e) => {
                tracing::warn!(error = %e, "could not start operation; task not run");
                self.service.registry().remove(id);
                return;
            }
        };
        let operation_type = operation.operation_type();
        tracing::Span::current().record("type", operation_type.as_str());

        let deadline = Instant::now() + self.service.policies().deadline(operation_type);
        let ctx = TaskContext::new(
            id,
            operation_type,
            operation.tenant_id(),
            operation.parameters().clone(),
            deadline,
            token.clone(),
        );

        metrics::gauge!("operations_in_flight").increment(1.0);
        let started = Instant::now();
        let outcome = self.run_task(ctx, &token, deadline, task).await;
        metrics::gauge!("operations_in_flight").decrement(1.0);
        metrics::histogram!("operation_task_duration_seconds", "outcome" => outcome.label())
            .record(started.elapsed().as_secs_f64());

        // Clear the handle before the final write so a retry issued as soon
        // as the row settles can dispatch again.
        let registry = self.service.registry();
        let cancel_reason = registry.reason(id);
        registry.remove(id);

        self.settle(id, outcome, cancel_reason).await;
    }

    async fn run_task<F, Fut>(
        &self,
        ctx: TaskContext,
        token: &CancellationToken,
        deadline: Instant,
        task: F,
    ) -> Outcome
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        // The inner spawn is the fault boundary: a panic ends that task only.
        // The future is built inside it so a panicking closure is caught too.
        let mut handle = tokio::spawn(async move { task(ctx).await }.in_current_span());

        tokio::select! {
            biased;

            joined = &mut handle => outcome_of(joined, token),
            _ = token.cancelled() => {
                self.wait_or_abort(&mut handle).await;
                Outcome::Interrupted
            }
            _ = tokio::time::sleep_until(deadline) => {
                token.cancel();
                self.wait_or_abort(&mut handle).await;
                Outcome::TimedOut
            }
        }
    }

    async fn wait_or_abort(&self, handle: &mut JoinHandle<TaskResult>) {
        if tokio::time::timeout(self.config.cancel_grace, &mut *handle)
            .await
            .is_err()
        {
            tracing::warn!(
                grace_ms = self.config.cancel_grace.as_millis() as u64,
                "task ignored cancellation; aborting"
            );
            handle.abort();
        }
    }

    async fn settle(&self, id: OperationId, outcome: Outcome, cancel_reason: Option<String>) {
        let written = match outcome {
            Outcome::Succeeded(result) => self.service.complete_operation(id, result).await,
            Outcome::Failed(message) => self.service.fail_operation(id, &message).await,
            Outcome::Panicked(message) => {
                tracing::error!(panic = %message, "task panicked");
                self.service
                    .fail_operation(id, &format!("internal: {message}"))
                    .await
            }
            Outcome::TimedOut => self.service.fail_operation(id, TIMEOUT_MESSAGE).await,
            Outcome::Interrupted => match cancel_reason {
                Some(reason) => self.service.cancel_operation(id, &reason).await,
                None => self.service.fail_operation(id, SHUTDOWN_MESSAGE).await,
            },
        };

        match written {
            Ok(_) => {}
            Err(e) if e.is_concurrent_modification() || e.is_invalid_transition() => {
                tracing::info!(error = %e, "operation moved on elsewhere; abandoning task outcome");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to record task outcome");
            }
        }
    }
}

fn outcome_of(joined: std::result::Result<TaskResult, JoinError>, token: &CancellationToken) -> Outcome {
    match joined {
        Ok(Ok(result)) => Outcome::Succeeded(result),
        Ok(Err(_)) if token.is_cancelled() => Outcome::Interrupted,
        Ok(Err(TaskError::Cancelled)) => Outcome::Interrupted,
        Ok(Err(e)) => Outcome::Failed(e.to_string()),
        Err(e) if e.is_panic() => Outcome::Panicked(panic_message(e.into_panic())),
        Err(_) => Outcome::Interrupted,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("kaboom"))), "kaboom");
        assert_eq!(panic_message(Box::new(42_u8)), "task panicked");
    }

    #[test]
    fn outcome_of_classifies_join_results() {
        let token = CancellationToken::new();

        assert!(matches!(
            outcome_of(
                Ok(Err(TaskError::failed("db unreachable"))),
                &token
            ),
            Outcome::Failed(message) if message == "db unreachable"
        ));
        assert!(matches!(
            outcome_of(
                Ok(Err(TaskError::Cancelled)),
                &token
            ),
            Outcome::Interrupted
        ));

        token.cancel();
        assert!(matches!(
            outcome_of(
                Ok(Err(TaskError::failed("connection reset"))),
                &token
            ),
            Outcome::Interrupted
        ));
    }

    #[test]
    fn default_grace_is_five_seconds() {
        assert_eq!(ExecutorConfig::default().cancel_grace, Duration::from_secs(5));
        assert_eq!(
            ExecutorConfig::new()
                .with_cancel_grace(Duration::from_millis(50))
                .cancel_grace,
            Duration::from_millis(50)
        );
    }
}
