//! Enqueue API used by request handlers.

use std::future::Future;
use std::sync::Arc;

use common::{OperationId, TenantId};
use domain::{Operation, OperationError, OperationType, Payload};
use operation_store::OperationRepository;

use crate::error::{Result, ServiceError};
use crate::executor::OperationExecutor;
use crate::service::OperationService;
use crate::task::{TaskCatalog, TaskContext, TaskResult};

/// Cancel reason for operations created while the executor refused work.
pub const DISPATCH_REFUSED_MESSAGE: &str = "executor shutting down";

/// Creates operations and hands them to the executor in one call.
pub struct OperationDispatcher<R: OperationRepository> {
    executor: OperationExecutor<R>,
    catalog: Arc<TaskCatalog>,
}

impl<R: OperationRepository> Clone for OperationDispatcher<R> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            catalog: Arc::clone(&self.catalog),
        }
    }
}

impl<R: OperationRepository + 'static> OperationDispatcher<R> {
    pub fn new(executor: OperationExecutor<R>, catalog: TaskCatalog) -> Self {
        Self {
            executor,
            catalog: Arc::new(catalog),
        }
    }

    pub fn service(&self) -> &Arc<OperationService<R>> {
        self.executor.service()
    }

    pub fn executor(&self) -> &OperationExecutor<R> {
        &self.executor
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    /// Persists a pending operation and dispatches `task` for it.
    ///
    /// Returns once the row exists and the worker is spawned. If the
    /// dispatch is refused the new row is cancelled with
    /// [`DISPATCH_REFUSED_MESSAGE`] and the error is returned.
    pub async fn enqueue<F, Fut>(
        &self,
        operation_type: OperationType,
        tenant_id: Option<TenantId>,
        parameters: Payload,
        task: F,
    ) -> Result<OperationId>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let operation = self
            .service()
            .create_operation(operation_type, tenant_id, parameters)
            .await?;
        let id = operation.id();
        if let Err(e) = self.executor.dispatch(id, task) {
            if let Err(cancel_err) = self
                .service()
                .cancel_operation(id, DISPATCH_REFUSED_MESSAGE)
                .await
            {
                tracing::warn!(
                    operation_id = %id,
                    error = %cancel_err,
                    "could not cancel undispatched operation"
                );
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Like [`Self::enqueue`], with the task body taken from the catalog.
    pub async fn enqueue_registered(
        &self,
        operation_type: OperationType,
        tenant_id: Option<TenantId>,
        parameters: Payload,
    ) -> Result<OperationId> {
        let handler = self
            .catalog
            .get(operation_type)
            .ok_or(OperationError::UnknownOperationType(operation_type))?;
        self.enqueue(operation_type, tenant_id, parameters, move |ctx| handler(ctx))
            .await
    }

    /// Retries a failed operation and, if the catalog knows its type, runs it
    /// again. Returns the pending operation and whether it was dispatched.
    pub async fn retry(&self, id: OperationId) -> Result<(Operation, bool)> {
        let operation = self.service().retry_operation(id).await?;

        let Some(handler) = self.catalog.get(operation.operation_type()) else {
            tracing::info!(
                operation_id = %id,
                r#type = %operation.operation_type(),
                "no task registered for type; retried operation left pending"
            );
            return Ok((operation, false));
        };

        match self.executor.dispatch(id, move |ctx| handler(ctx)) {
            Ok(_) => Ok((operation, true)),
            Err(ServiceError::AlreadyRunning(_)) => {
                tracing::warn!(operation_id = %id, "previous task still registered; not re-dispatched");
                Ok((operation, false))
            }
            Err(e) => Err(e),
        }
    }
}
