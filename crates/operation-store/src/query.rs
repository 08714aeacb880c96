use domain::{Operation, OperationStatus, OperationType};

use crate::TenantId;

/// Filter for listing operations.
///
/// Results are ordered newest first (`created_at` descending, then id
/// descending) before `offset` and `limit` are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationQuery {
    /// Filter by tenant.
    pub tenant_id: Option<TenantId>,

    /// Filter by status.
    pub status: Option<OperationStatus>,

    /// Filter by operation type.
    pub operation_type: Option<OperationType>,

    /// Maximum number of operations to return.
    pub limit: Option<usize>,

    /// Number of operations to skip.
    pub offset: Option<usize>,
}

impl OperationQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for a specific tenant.
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Default::default()
        }
    }

    /// Filters by tenant.
    pub fn tenant_id(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    /// Filters by status.
    pub fn status(mut self, status: OperationStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filters by operation type.
    pub fn operation_type(mut self, operation_type: OperationType) -> Self {
        self.operation_type = Some(operation_type);
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips a number of results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if `operation` passes every filter of this query.
    pub fn matches(&self, operation: &Operation) -> bool {
        if let Some(tenant_id) = self.tenant_id
            && operation.tenant_id() != Some(tenant_id)
        {
            return false;
        }
        if let Some(status) = self.status
            && operation.status() != status
        {
            return false;
        }
        if let Some(operation_type) = self.operation_type
            && operation.operation_type() != operation_type
        {
            return false;
        }
        true
    }
}
