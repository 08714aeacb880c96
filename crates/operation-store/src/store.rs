use async_trait::async_trait;
use domain::{NewOperation, Operation, OperationStatus};

use crate::{OperationId, OperationQuery, Result, TenantId};

/// Persistence port for operations.
///
/// Each call mutates at most one operation row, atomically.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OperationRepository: Send + Sync {
    /// Persists a new operation and assigns its id.
    ///
    /// Fails with `Duplicate` only if the adapter detects an id collision.
    async fn create(&self, new: NewOperation) -> Result<Operation>;

    /// Retrieves an operation by id.
    ///
    /// Returns None if it doesn't exist.
    async fn find_by_id(&self, id: OperationId) -> Result<Option<Operation>>;

    /// Retrieves all operations for a tenant, newest first.
    async fn find_by_tenant_id(&self, tenant_id: TenantId) -> Result<Vec<Operation>>;

    /// Retrieves all operations in a status, oldest first.
    async fn find_by_status(&self, status: OperationStatus) -> Result<Vec<Operation>>;

    /// Retrieves every operation that is not in a terminal state, oldest first.
    async fn find_incomplete(&self) -> Result<Vec<Operation>>;

    /// Retrieves operations matching a query.
    async fn query(&self, query: OperationQuery) -> Result<Vec<Operation>>;

    /// Writes all mutable columns of `operation`.
    ///
    /// The write succeeds only if the stored version equals
    /// `operation.version()`; otherwise it fails with
    /// `ConcurrentModification` and nothing is written. Returns the operation
    /// at its new version.
    async fn update(&self, operation: &Operation) -> Result<Operation>;
}

/// Extension trait providing convenience methods for repositories.
#[async_trait]
pub trait OperationRepositoryExt: OperationRepository {
    /// Checks if an operation exists.
    async fn exists(&self, id: OperationId) -> Result<bool> {
        Ok(self.find_by_id(id).await?.is_some())
    }

    /// Retrieves an operation, treating absence as an error.
    async fn get(&self, id: OperationId) -> Result<Operation> {
        self.find_by_id(id)
            .await?
            .ok_or(crate::RepositoryError::NotFound(id))
    }
}

// Blanket implementation for all OperationRepository implementations
impl<T: OperationRepository + ?Sized> OperationRepositoryExt for T {}

#[async_trait]
impl<T: OperationRepository + ?Sized> OperationRepository for std::sync::Arc<T> {
    async fn create(&self, new: NewOperation) -> Result<Operation> {
        (**self).create(new).await
    }

    async fn find_by_id(&self, id: OperationId) -> Result<Option<Operation>> {
        (**self).find_by_id(id).await
    }

    async fn find_by_tenant_id(&self, tenant_id: TenantId) -> Result<Vec<Operation>> {
        (**self).find_by_tenant_id(tenant_id).await
    }

    async fn find_by_status(&self, status: OperationStatus) -> Result<Vec<Operation>> {
        (**self).find_by_status(status).await
    }

    async fn find_incomplete(&self) -> Result<Vec<Operation>> {
        (**self).find_incomplete().await
    }

    async fn query(&self, query: OperationQuery) -> Result<Vec<Operation>> {
        (**self).query(query).await
    }

    async fn update(&self, operation: &Operation) -> Result<Operation> {
        (**self).update(operation).await
    }
}
