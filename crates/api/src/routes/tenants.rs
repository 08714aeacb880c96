//! Tenant lifecycle endpoints.
//!
//! Each request only enqueues an operation; the work itself runs in the
//! background and is tracked under `/operations/{id}`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::TenantId;
use domain::{OperationType, Payload};
use operation_store::OperationRepository;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::routes::operations::{AppState, parse_tenant_id};

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub region: String,
}

#[derive(Debug, Deserialize)]
pub struct MigrateRegionRequest {
    pub region: String,
}

#[derive(Debug, Serialize)]
pub struct EnqueuedResponse {
    pub operation_id: i64,
    pub tenant_id: String,
}

type Accepted = (StatusCode, Json<EnqueuedResponse>);

/// POST /tenants — enqueue provisioning of a new tenant.
#[tracing::instrument(skip(state))]
pub async fn create<R: OperationRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<CreateTenantRequest>,
) -> Result<Accepted, ApiError> {
    let name = req.name.trim();
    let region = req.region.trim();
    if name.is_empty() || region.is_empty() {
        return Err(ApiError::BadRequest(
            "name and region must not be empty".to_string(),
        ));
    }

    let params = json!({ "name": name, "region": region });
    enqueue(&state, OperationType::TenantCreate, TenantId::new(), params).await
}

/// DELETE /tenants/{id} — enqueue removal of a tenant.
#[tracing::instrument(skip(state))]
pub async fn delete<R: OperationRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<Accepted, ApiError> {
    let tenant_id = parse_tenant_id(&id)?;
    enqueue(&state, OperationType::TenantDelete, tenant_id, json!({})).await
}

/// POST /tenants/{id}/suspend
#[tracing::instrument(skip(state))]
pub async fn suspend<R: OperationRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<Accepted, ApiError> {
    let tenant_id = parse_tenant_id(&id)?;
    enqueue(&state, OperationType::TenantSuspend, tenant_id, json!({})).await
}

/// POST /tenants/{id}/resume
#[tracing::instrument(skip(state))]
pub async fn resume<R: OperationRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<Accepted, ApiError> {
    let tenant_id = parse_tenant_id(&id)?;
    enqueue(&state, OperationType::TenantResume, tenant_id, json!({})).await
}

/// POST /tenants/{id}/migrate — move a tenant to another region.
#[tracing::instrument(skip(state, req))]
pub async fn migrate<R: OperationRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Json(req): Json<MigrateRegionRequest>,
) -> Result<Accepted, ApiError> {
    let tenant_id = parse_tenant_id(&id)?;
    if req.region.trim().is_empty() {
        return Err(ApiError::BadRequest("region must not be empty".to_string()));
    }
    let params = json!({ "region": req.region.trim() });
    enqueue(&state, OperationType::TenantMigrateRegion, tenant_id, params).await
}

async fn enqueue<R: OperationRepository + 'static>(
    state: &AppState<R>,
    operation_type: OperationType,
    tenant_id: TenantId,
    params: serde_json::Value,
) -> Result<Accepted, ApiError> {
    let parameters: Payload = match params {
        serde_json::Value::Object(map) => map,
        _ => Payload::new(),
    };
    let operation_id = state
        .dispatcher
        .enqueue_registered(operation_type, Some(tenant_id), parameters)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueuedResponse {
            operation_id: operation_id.as_i64(),
            tenant_id: tenant_id.to_string(),
        }),
    ))
}
