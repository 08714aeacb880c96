//! Operation service: load, transition, persist.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{Clock, OperationId, TenantId};
use domain::{
    MAX_ERROR_MESSAGE_BYTES, NewOperation, Operation, OperationError, OperationPolicies,
    OperationStatus, OperationType, Payload, truncate_message,
};
use operation_store::{OperationQuery, OperationRepository};

use crate::error::{Result, ServiceError};
use crate::registry::CancelRegistry;

/// Coordinates operation lifecycle changes.
///
/// Every transition loads the row, applies the entity method and writes it
/// back with a version check. A write that loses a race is retried once
/// against a fresh load; if the fresh load no longer admits the action, the
/// original conflict is returned.
pub struct OperationService<R: OperationRepository> {
    repo: R,
    clock: Arc<dyn Clock>,
    policies: Arc<OperationPolicies>,
    registry: CancelRegistry,
}

impl<R: OperationRepository> OperationService<R> {
    /// Creates a service with its own cancel registry.
    pub fn new(repo: R, clock: Arc<dyn Clock>, policies: Arc<OperationPolicies>) -> Self {
        Self {
            repo,
            clock,
            policies,
            registry: CancelRegistry::new(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn policies(&self) -> &OperationPolicies {
        &self.policies
    }

    pub fn registry(&self) -> &CancelRegistry {
        &self.registry
    }

    /// Persists a new pending operation.
    #[tracing::instrument(skip(self, parameters))]
    pub async fn create_operation(
        &self,
        operation_type: OperationType,
        tenant_id: Option<TenantId>,
        parameters: Payload,
    ) -> Result<Operation> {
        let new = NewOperation::new(operation_type, tenant_id, parameters, self.clock.now());
        let operation = self
            .repo
            .create(new)
            .await
            .map_err(|e| ServiceError::repository(None, "create", e))?;

        metrics::counter!("operations_created_total", "type" => operation_type.as_str())
            .increment(1);
        tracing::info!(
            operation_id = %operation.id(),
            r#type = %operation_type,
            tenant_id = ?tenant_id,
            "operation created"
        );
        Ok(operation)
    }

    /// Loads an operation, failing with `OperationNotFound` if it is missing.
    pub async fn get_operation(&self, id: OperationId) -> Result<Operation> {
        self.find_operation(id)
            .await?
            .ok_or(ServiceError::OperationNotFound(id))
    }

    pub async fn find_operation(&self, id: OperationId) -> Result<Option<Operation>> {
        self.repo
            .find_by_id(id)
            .await
            .map_err(|e| ServiceError::repository(Some(id), "load", e))
    }

    /// `pending → in_progress`.
    pub async fn start_operation(&self, id: OperationId) -> Result<Operation> {
        self.transition(id, "start", |op, now| {
            op.start(now)?;
            Ok(true)
        })
        .await
    }

    /// `in_progress → completed`, storing `result` verbatim.
    pub async fn complete_operation(&self, id: OperationId, result: Payload) -> Result<Operation> {
        self.transition(id, "complete", |op, now| {
            op.complete(result.clone(), now)?;
            Ok(true)
        })
        .await
    }

    /// `in_progress → failed`, with `message` cut to 4 KiB.
    pub async fn fail_operation(&self, id: OperationId, message: &str) -> Result<Operation> {
        let message = truncate_message(message, MAX_ERROR_MESSAGE_BYTES);
        self.transition(id, "fail", |op, now| {
            self.snapshot_progress(op, now);
            op.fail(message, now)?;
            Ok(true)
        })
        .await
    }

    /// `pending | in_progress → cancelled`, then signals the live task.
    ///
    /// Cancelling an already cancelled operation succeeds without a write.
    pub async fn cancel_operation(&self, id: OperationId, reason: &str) -> Result<Operation> {
        let reason = truncate_message(reason, MAX_ERROR_MESSAGE_BYTES);
        let (operation, changed) = self
            .run_transition(id, "cancel", |op, now| {
                if op.status() == OperationStatus::Cancelled {
                    return Ok(false);
                }
                self.snapshot_progress(op, now);
                op.cancel(reason, now)?;
                Ok(true)
            })
            .await?;

        if changed && !self.registry.cancel(id, reason) {
            tracing::info!(operation_id = %id, "cancel-without-live-task");
        }
        Ok(operation)
    }

    /// `failed → pending`, within the retry cap of the operation type.
    ///
    /// Re-dispatching the task is up to the caller.
    pub async fn retry_operation(&self, id: OperationId) -> Result<Operation> {
        self.transition(id, "retry", |op, now| {
            op.retry(&self.policies, now)?;
            Ok(true)
        })
        .await
    }

    /// Operations that are pending, in progress or failed, oldest first.
    pub async fn list_incomplete_operations(&self) -> Result<Vec<Operation>> {
        self.repo
            .find_incomplete()
            .await
            .map_err(|e| ServiceError::repository(None, "list incomplete operations", e))
    }

    /// Operations of a tenant, newest first.
    pub async fn get_operations_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<Operation>> {
        self.repo
            .find_by_tenant_id(tenant_id)
            .await
            .map_err(|e| ServiceError::repository(None, "list tenant operations", e))
    }

    pub async fn list_operations(&self, query: OperationQuery) -> Result<Vec<Operation>> {
        self.repo
            .query(query)
            .await
            .map_err(|e| ServiceError::repository(None, "list operations", e))
    }

    /// In-progress operations started more than `threshold` ago, oldest
    /// start first.
    pub async fn list_stalled_operations(&self, threshold: Duration) -> Result<Vec<Operation>> {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        let now = self.clock.now();
        let cutoff = now.checked_sub_signed(threshold);

        let mut stalled: Vec<Operation> = self
            .repo
            .find_by_status(OperationStatus::InProgress)
            .await
            .map_err(|e| ServiceError::repository(None, "list stalled operations", e))?
            .into_iter()
            .filter(|op| match (op.started_at(), cutoff) {
                (Some(started_at), Some(cutoff)) => started_at < cutoff,
                _ => false,
            })
            .collect();
        stalled.sort_by_key(|op| (op.started_at(), op.id()));
        Ok(stalled)
    }

    /// Progress of `operation` now. An unknown type is logged and reads as 0.
    pub fn progress(&self, operation: &Operation) -> u8 {
        operation
            .progress(self.clock.now(), &self.policies)
            .unwrap_or_else(|e| {
                tracing::warn!(operation_id = %operation.id(), error = %e, "progress unavailable");
                0
            })
    }

    /// Expected completion instant. An unknown type is logged and reads as none.
    pub fn estimate_completion_time(&self, operation: &Operation) -> Option<DateTime<Utc>> {
        operation
            .estimate_completion_time(&self.policies)
            .unwrap_or_else(|e| {
                tracing::warn!(operation_id = %operation.id(), error = %e, "estimate unavailable");
                None
            })
    }

    async fn transition<F>(&self, id: OperationId, action: &'static str, apply: F) -> Result<Operation>
    where
        F: Fn(&mut Operation, DateTime<Utc>) -> std::result::Result<bool, OperationError>,
    {
        self.run_transition(id, action, apply).await.map(|(operation, _)| operation)
    }

    /// Runs `apply` against the stored row and persists it if it reports a
    /// change. Returns the resulting operation and whether a write happened.
    async fn run_transition<F>(
        &self,
        id: OperationId,
        action: &'static str,
        apply: F,
    ) -> Result<(Operation, bool)>
    where
        F: Fn(&mut Operation, DateTime<Utc>) -> std::result::Result<bool, OperationError>,
    {
        match self.try_transition(id, action, &apply).await {
            Err(conflict) if conflict.is_concurrent_modification() => {
                metrics::counter!("operation_conflicts_total").increment(1);
                tracing::debug!(operation_id = %id, action, "write conflict, reloading once");

                match self.try_transition(id, action, &apply).await {
                    Err(retry_err) if retry_err.is_invalid_transition() => Err(conflict),
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn try_transition<F>(
        &self,
        id: OperationId,
        action: &'static str,
        apply: &F,
    ) -> Result<(Operation, bool)>
    where
        F: Fn(&mut Operation, DateTime<Utc>) -> std::result::Result<bool, OperationError>,
    {
        let mut operation = self.get_operation(id).await?;
        let from = operation.status();
        let entered_at = operation.updated_at();

        if !apply(&mut operation, self.clock.now())? {
            return Ok((operation, false));
        }

        let saved = self
            .repo
            .update(&operation)
            .await
            .map_err(|e| ServiceError::repository(Some(id), action, e))?;

        let duration_ms = (saved.updated_at() - entered_at).num_milliseconds().max(0);
        metrics::counter!("operation_transitions_total", "to" => saved.status().as_str())
            .increment(1);
        tracing::info!(
            operation_id = %id,
            r#type = %saved.operation_type(),
            from = %from,
            to = %saved.status(),
            duration_ms,
            "operation transition"
        );
        Ok((saved, true))
    }

    fn snapshot_progress(&self, operation: &mut Operation, now: DateTime<Utc>) {
        if let Err(e) = operation.record_progress(now, &self.policies) {
            tracing::warn!(operation_id = %operation.id(), error = %e, "progress unavailable");
        }
    }
}

#[cfg(test)]
mod tests {
    use common::ManualClock;
    use domain::OperationType;
    use operation_store::{InMemoryOperationRepository, RepositoryError};
    use serde_json::json;

    use super::*;

    fn service() -> (OperationService<InMemoryOperationRepository>, ManualClock) {
        let clock = ManualClock::starting_now();
        let service = OperationService::new(
            InMemoryOperationRepository::new(),
            Arc::new(clock.clone()),
            Arc::new(OperationPolicies::default()),
        );
        (service, clock)
    }

    fn params(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    async fn running(service: &OperationService<InMemoryOperationRepository>) -> Operation {
        let op = service
            .create_operation(OperationType::TenantCreate, Some(TenantId::new()), Payload::new())
            .await
            .unwrap();
        service.start_operation(op.id()).await.unwrap()
    }

    #[tokio::test]
    async fn create_start_complete() {
        let (service, clock) = service();
        let tenant = TenantId::new();

        let op = service
            .create_operation(
                OperationType::TenantCreate,
                Some(tenant),
                params(json!({"name": "acme", "region": "eu1"})),
            )
            .await
            .unwrap();
        assert_eq!(op.status(), OperationStatus::Pending);

        clock.advance(Duration::from_secs(1));
        let op = service.start_operation(op.id()).await.unwrap();
        assert_eq!(op.status(), OperationStatus::InProgress);
        assert_eq!(op.started_at(), Some(clock.now()));

        clock.advance(Duration::from_secs(2));
        let op = service
            .complete_operation(op.id(), params(json!({"endpoint": "https://acme.eu1"})))
            .await
            .unwrap();
        assert_eq!(op.status(), OperationStatus::Completed);
        assert_eq!(op.result().unwrap()["endpoint"], "https://acme.eu1");
        assert_eq!(service.progress(&op), 100);

        let stored = service.get_operation(op.id()).await.unwrap();
        assert_eq!(stored, op);
    }

    #[tokio::test]
    async fn unknown_operation_is_not_found() {
        let (service, _) = service();
        let err = service.start_operation(OperationId::new(42)).await.unwrap_err();
        assert!(matches!(err, ServiceError::OperationNotFound(id) if id == OperationId::new(42)));
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected_without_write() {
        let (service, _) = service();
        let op = service
            .create_operation(OperationType::TenantDelete, None, Payload::new())
            .await
            .unwrap();

        let err = service
            .complete_operation(op.id(), Payload::new())
            .await
            .unwrap_err();
        assert!(err.is_invalid_transition());

        let stored = service.get_operation(op.id()).await.unwrap();
        assert_eq!(stored.version(), op.version());
    }

    #[tokio::test]
    async fn fail_truncates_long_messages() {
        let (service, _) = service();
        let op = running(&service).await;

        let long = "é".repeat(MAX_ERROR_MESSAGE_BYTES);
        let op = service.fail_operation(op.id(), &long).await.unwrap();

        let message = op.error_message().unwrap();
        assert!(message.len() <= MAX_ERROR_MESSAGE_BYTES);
        assert!(message.chars().all(|c| c == 'é'));
        assert!(op.completed_at().is_some());
    }

    #[tokio::test]
    async fn fail_snapshots_progress() {
        let (service, clock) = service();
        let op = running(&service).await;

        // tenant.create expects five minutes
        clock.advance(Duration::from_secs(150));
        let op = service.fail_operation(op.id(), "db unreachable").await.unwrap();

        assert_eq!(op.last_progress(), Some(50));
        clock.advance(Duration::from_secs(600));
        assert_eq!(service.progress(&op), 50);
    }

    #[tokio::test]
    async fn double_cancel_is_idempotent() {
        let (service, _) = service();
        let op = running(&service).await;

        let first = service.cancel_operation(op.id(), "user aborted").await.unwrap();
        assert_eq!(first.status(), OperationStatus::Cancelled);
        assert_eq!(first.error_message(), Some("user aborted"));

        let second = service.cancel_operation(op.id(), "again").await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn cancel_signals_registered_task() {
        let (service, _) = service();
        let op = running(&service).await;
        let token = service.registry().register(op.id()).unwrap();

        service.cancel_operation(op.id(), "user aborted").await.unwrap();

        assert!(token.is_cancelled());
        assert_eq!(
            service.registry().reason(op.id()).as_deref(),
            Some("user aborted")
        );
    }

    #[tokio::test]
    async fn cancel_of_completed_operation_is_rejected() {
        let (service, _) = service();
        let op = running(&service).await;
        service
            .complete_operation(op.id(), Payload::new())
            .await
            .unwrap();

        let err = service.cancel_operation(op.id(), "too late").await.unwrap_err();
        assert!(err.is_invalid_transition());
    }

    #[tokio::test]
    async fn retry_resets_failed_operation() {
        let (service, _) = service();
        let op = running(&service).await;
        service.fail_operation(op.id(), "db unreachable").await.unwrap();

        let op = service.retry_operation(op.id()).await.unwrap();

        assert_eq!(op.status(), OperationStatus::Pending);
        assert!(op.error_message().is_none());
        assert!(op.started_at().is_none());
        assert_eq!(op.retry_count(), 1);
        assert_eq!(service.progress(&op), 0);
    }

    #[tokio::test]
    async fn retry_respects_type_limit() {
        let clock = ManualClock::starting_now();
        let policies = OperationPolicies::default().with_max_retries(OperationType::TenantCreate, 1);
        let service = OperationService::new(
            InMemoryOperationRepository::new(),
            Arc::new(clock),
            Arc::new(policies),
        );

        let op = running(&service).await;
        service.fail_operation(op.id(), "first").await.unwrap();
        service.retry_operation(op.id()).await.unwrap();
        service.start_operation(op.id()).await.unwrap();
        service.fail_operation(op.id(), "second").await.unwrap();

        let err = service.retry_operation(op.id()).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Operation(OperationError::RetryLimitExceeded { attempts: 1, limit: 1 })
        ));
    }

    #[tokio::test]
    async fn stalled_operations_are_oldest_first() {
        let (service, clock) = service();

        let first = running(&service).await;
        clock.advance(Duration::from_secs(60));
        let second = running(&service).await;
        clock.advance(Duration::from_secs(60));
        let _pending = service
            .create_operation(OperationType::TenantUpdate, None, Payload::new())
            .await
            .unwrap();

        clock.advance(Duration::from_secs(29 * 60));
        let stalled = service
            .list_stalled_operations(Duration::from_secs(30 * 60))
            .await
            .unwrap();
        let ids: Vec<_> = stalled.iter().map(Operation::id).collect();
        assert_eq!(ids, vec![first.id()]);

        clock.advance(Duration::from_secs(60));
        let stalled = service
            .list_stalled_operations(Duration::from_secs(30 * 60))
            .await
            .unwrap();
        let ids: Vec<_> = stalled.iter().map(Operation::id).collect();
        assert_eq!(ids, vec![first.id(), second.id()]);
    }

    #[tokio::test]
    async fn unknown_type_progress_reads_as_zero() {
        let clock = ManualClock::starting_now();
        let service = OperationService::new(
            InMemoryOperationRepository::new(),
            Arc::new(clock),
            Arc::new(OperationPolicies::empty()),
        );
        let op = running(&service).await;

        assert_eq!(service.progress(&op), 0);
        assert!(service.estimate_completion_time(&op).is_none());
    }

    #[tokio::test]
    async fn estimate_uses_expected_duration() {
        let (service, _) = service();
        let op = running(&service).await;

        let eta = service.estimate_completion_time(&op).unwrap();
        assert_eq!(eta - op.started_at().unwrap(), chrono::Duration::minutes(5));
    }

    #[tokio::test]
    async fn repository_failures_are_wrapped_with_context() {
        let (service, _) = service();
        let op = running(&service).await;
        service.repository().set_unavailable(true);

        let err = service
            .complete_operation(op.id(), Payload::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Repository {
                operation_id: Some(id),
                action: "load",
                source: RepositoryError::Unavailable(_),
            } if id == op.id()
        ));
    }

    #[tokio::test]
    async fn lists_by_tenant_and_incomplete() {
        let (service, _) = service();
        let tenant = TenantId::new();

        let a = service
            .create_operation(OperationType::TenantCreate, Some(tenant), Payload::new())
            .await
            .unwrap();
        let b = service
            .create_operation(OperationType::TenantSuspend, Some(tenant), Payload::new())
            .await
            .unwrap();
        service.start_operation(b.id()).await.unwrap();
        service
            .complete_operation(b.id(), Payload::new())
            .await
            .unwrap();

        let by_tenant = service.get_operations_by_tenant(tenant).await.unwrap();
        assert_eq!(by_tenant.len(), 2);

        let incomplete = service.list_incomplete_operations().await.unwrap();
        let ids: Vec<_> = incomplete.iter().map(Operation::id).collect();
        assert_eq!(ids, vec![a.id()]);

        let suspends = service
            .list_operations(OperationQuery::new().operation_type(OperationType::TenantSuspend))
            .await
            .unwrap();
        assert_eq!(suspends.len(), 1);
    }
}
