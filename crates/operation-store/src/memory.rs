use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use domain::{NewOperation, Operation, OperationStatus};
use tokio::sync::RwLock;

use crate::{
    OperationId, OperationQuery, RepositoryError, Result, TenantId, store::OperationRepository,
};

#[derive(Debug, Default)]
struct Rows {
    operations: BTreeMap<OperationId, Operation>,
    last_id: i64,
}

/// In-memory operation repository.
///
/// Provides the same contract as the PostgreSQL implementation, including
/// sequence-assigned ids and version-checked updates. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOperationRepository {
    rows: Arc<RwLock<Rows>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryOperationRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored operations.
    pub async fn len(&self) -> usize {
        self.rows.read().await.operations.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Makes every subsequent call fail with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "in-memory repository marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    async fn collect<F>(&self, filter: F) -> Vec<Operation>
    where
        F: Fn(&Operation) -> bool,
    {
        let rows = self.rows.read().await;
        rows.operations
            .values()
            .filter(|op| filter(op))
            .cloned()
            .collect()
    }
}

fn oldest_first(operations: &mut [Operation]) {
    operations.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then(a.id().cmp(&b.id()))
    });
}

fn newest_first(operations: &mut [Operation]) {
    operations.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then(b.id().cmp(&a.id()))
    });
}

#[async_trait]
impl OperationRepository for InMemoryOperationRepository {
    async fn create(&self, new: NewOperation) -> Result<Operation> {
        self.check_available()?;

        let mut rows = self.rows.write().await;
        rows.last_id += 1;
        let id = OperationId::new(rows.last_id);

        if rows.operations.contains_key(&id) {
            return Err(RepositoryError::Duplicate(id));
        }

        let operation = Operation::create(id, new);
        rows.operations.insert(id, operation.clone());
        Ok(operation)
    }

    async fn find_by_id(&self, id: OperationId) -> Result<Option<Operation>> {
        self.check_available()?;
        Ok(self.rows.read().await.operations.get(&id).cloned())
    }

    async fn find_by_tenant_id(&self, tenant_id: TenantId) -> Result<Vec<Operation>> {
        self.check_available()?;
        let mut operations = self
            .collect(|op| op.tenant_id() == Some(tenant_id))
            .await;
        newest_first(&mut operations);
        Ok(operations)
    }

    async fn find_by_status(&self, status: OperationStatus) -> Result<Vec<Operation>> {
        self.check_available()?;
        let mut operations = self.collect(|op| op.status() == status).await;
        oldest_first(&mut operations);
        Ok(operations)
    }

    async fn find_incomplete(&self) -> Result<Vec<Operation>> {
        self.check_available()?;
        let mut operations = self.collect(|op| !op.is_terminal()).await;
        oldest_first(&mut operations);
        Ok(operations)
    }

    async fn query(&self, query: OperationQuery) -> Result<Vec<Operation>> {
        self.check_available()?;
        let mut operations = self.collect(|op| query.matches(op)).await;
        newest_first(&mut operations);

        let offset = query.offset.unwrap_or(0);
        let operations = operations.into_iter().skip(offset);
        let operations = match query.limit {
            Some(limit) => operations.take(limit).collect(),
            None => operations.collect(),
        };
        Ok(operations)
    }

    async fn update(&self, operation: &Operation) -> Result<Operation> {
        self.check_available()?;

        let mut rows = self.rows.write().await;
        let stored = rows
            .operations
            .get_mut(&operation.id())
            .ok_or(RepositoryError::NotFound(operation.id()))?;

        if stored.version() != operation.version() {
            return Err(RepositoryError::ConcurrentModification {
                operation_id: operation.id(),
                expected: operation.version(),
                actual: stored.version(),
            });
        }

        let mut updated = operation.clone();
        updated.set_version(operation.version().next());
        *stored = updated.clone();
        Ok(updated)
    }
}
