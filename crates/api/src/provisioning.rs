//! Simulated tenant provisioner backing the enqueue endpoints.
//!
//! Stands in for the real infrastructure calls: each action takes a few
//! cancellable steps, then updates an in-memory tenant table.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use common::TenantId;
use domain::{OperationType, Payload};
use orchestrator::{TaskCatalog, TaskContext, TaskError, TaskResult};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantState {
    Active,
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantRecord {
    pub name: String,
    pub region: String,
    pub state: TenantState,
}

#[derive(Debug, Default)]
struct ProvisionerState {
    tenants: HashMap<TenantId, TenantRecord>,
    fail_next: Option<String>,
}

/// In-memory provisioner.
#[derive(Debug, Clone)]
pub struct InMemoryProvisioner {
    state: Arc<RwLock<ProvisionerState>>,
    step_delay: Duration,
    steps: u32,
}

impl Default for InMemoryProvisioner {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 4)
    }
}

impl InMemoryProvisioner {
    /// Creates a provisioner whose actions take `steps` pauses of `step_delay`.
    pub fn new(step_delay: Duration, steps: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(ProvisionerState::default())),
            step_delay,
            steps,
        }
    }

    /// Makes the next action fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.write().fail_next = Some(message.into());
    }

    pub fn tenant(&self, tenant_id: TenantId) -> Option<TenantRecord> {
        self.read().tenants.get(&tenant_id).cloned()
    }

    pub fn tenant_count(&self) -> usize {
        self.read().tenants.len()
    }

    /// Builds a task catalog with a handler for every tenant operation type.
    pub fn task_catalog(&self) -> TaskCatalog {
        OperationType::ALL
            .iter()
            .fold(TaskCatalog::new(), |catalog, &operation_type| {
                let provisioner = self.clone();
                catalog.register(operation_type, move |ctx| {
                    let provisioner = provisioner.clone();
                    async move { provisioner.run(ctx).await }
                })
            })
    }

    async fn run(&self, ctx: TaskContext) -> TaskResult {
        let tenant_id = ctx
            .tenant_id
            .ok_or_else(|| TaskError::failed("tenant operations require a tenant_id"))?;

        for step in 0..self.steps {
            tokio::select! {
                _ = ctx.cancelled() => return Err(TaskError::Cancelled),
                _ = tokio::time::sleep(self.step_delay) => {}
            }
            tracing::debug!(step, steps = self.steps, "provisioning step done");
        }

        let injected = self.write().fail_next.take();
        if let Some(message) = injected {
            return Err(TaskError::Failed(message));
        }

        match ctx.operation_type {
            OperationType::TenantCreate => self.create(tenant_id, &ctx),
            OperationType::TenantDelete => self.delete(tenant_id),
            OperationType::TenantUpdate => self.update(tenant_id, &ctx),
            OperationType::TenantSuspend => {
                self.set_state(tenant_id, TenantState::Active, TenantState::Suspended)
            }
            OperationType::TenantResume => {
                self.set_state(tenant_id, TenantState::Suspended, TenantState::Active)
            }
            OperationType::TenantMigrateRegion => self.migrate(tenant_id, &ctx),
        }
    }

    fn create(&self, tenant_id: TenantId, ctx: &TaskContext) -> TaskResult {
        let name = ctx.str_param("name")?.to_string();
        let region = ctx.str_param("region")?.to_string();

        let mut state = self.write();
        if state.tenants.contains_key(&tenant_id) {
            return Err(TaskError::failed(format!("tenant {tenant_id} already exists")));
        }
        let endpoint = format!("https://{name}.{region}");
        state.tenants.insert(
            tenant_id,
            TenantRecord {
                name,
                region,
                state: TenantState::Active,
            },
        );
        Ok(payload(json!({
            "tenant_id": tenant_id.to_string(),
            "endpoint": endpoint,
        })))
    }

    fn delete(&self, tenant_id: TenantId) -> TaskResult {
        self.write()
            .tenants
            .remove(&tenant_id)
            .ok_or_else(|| not_found(tenant_id))?;
        Ok(payload(json!({ "deleted": tenant_id.to_string() })))
    }

    fn update(&self, tenant_id: TenantId, ctx: &TaskContext) -> TaskResult {
        let mut state = self.write();
        let record = state
            .tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| not_found(tenant_id))?;
        if let Some(name) = ctx.parameters.get("name").and_then(|v| v.as_str()) {
            record.name = name.to_string();
        }
        Ok(payload(json!({ "name": record.name })))
    }

    fn set_state(&self, tenant_id: TenantId, from: TenantState, to: TenantState) -> TaskResult {
        let mut state = self.write();
        let record = state
            .tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| not_found(tenant_id))?;
        if record.state != from {
            return Err(TaskError::failed(format!(
                "tenant {tenant_id} is {:?}, expected {from:?}",
                record.state
            )));
        }
        record.state = to;
        Ok(payload(json!({ "state": to })))
    }

    fn migrate(&self, tenant_id: TenantId, ctx: &TaskContext) -> TaskResult {
        let region = ctx.str_param("region")?.to_string();
        let mut state = self.write();
        let record = state
            .tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| not_found(tenant_id))?;
        let previous = std::mem::replace(&mut record.region, region);
        Ok(payload(json!({ "from": previous, "to": record.region })))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ProvisionerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ProvisionerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_found(tenant_id: TenantId) -> TaskError {
    TaskError::failed(format!("tenant {tenant_id} not found"))
}

fn payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Payload::new(),
    }
}
