//! Operation query, cancel and retry endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{OperationId, TenantId};
use domain::{Operation, OperationStatus, OperationType, Payload};
use operation_store::{OperationQuery, OperationRepository};
use orchestrator::{OperationDispatcher, OperationService};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<R: OperationRepository> {
    pub service: Arc<OperationService<R>>,
    pub dispatcher: OperationDispatcher<R>,
    /// Default age for `GET /operations/stalled`.
    pub stall_threshold: Duration,
}

// -- Request types --

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub tenant_id: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub operation_type: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StalledParams {
    pub threshold_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: String,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub id: i64,
    #[serde(rename = "type")]
    pub operation_type: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub updated_at: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub retry_count: u32,
}

impl OperationResponse {
    fn new<R: OperationRepository>(operation: &Operation, service: &OperationService<R>) -> Self {
        Self {
            id: operation.id().as_i64(),
            operation_type: operation.operation_type().to_string(),
            status: operation.status().as_str().to_string(),
            tenant_id: operation.tenant_id().map(|t| t.to_string()),
            created_at: operation.created_at().to_rfc3339(),
            started_at: operation.started_at().map(|t| t.to_rfc3339()),
            completed_at: operation.completed_at().map(|t| t.to_rfc3339()),
            updated_at: operation.updated_at().to_rfc3339(),
            progress: service.progress(operation),
            estimated_completion: service
                .estimate_completion_time(operation)
                .map(|t| t.to_rfc3339()),
            result: operation.result().cloned(),
            error_message: operation.error_message().map(String::from),
            retry_count: operation.retry_count(),
        }
    }

    fn list<R: OperationRepository>(
        operations: &[Operation],
        service: &OperationService<R>,
    ) -> Vec<Self> {
        operations
            .iter()
            .map(|operation| Self::new(operation, service))
            .collect()
    }
}

// -- Handlers --

/// GET /operations/{id} — load one operation with its derived progress.
#[tracing::instrument(skip(state))]
pub async fn get<R: OperationRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<Json<OperationResponse>, ApiError> {
    let id = parse_operation_id(&id)?;
    let operation = state.service.get_operation(id).await?;
    Ok(Json(OperationResponse::new(&operation, &state.service)))
}

/// GET /operations — list operations, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<R: OperationRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<OperationResponse>>, ApiError> {
    let query = build_query(params)?;
    let operations = state.service.list_operations(query).await?;
    Ok(Json(OperationResponse::list(&operations, &state.service)))
}

/// GET /operations/stalled — in-progress operations older than the threshold.
#[tracing::instrument(skip(state))]
pub async fn stalled<R: OperationRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Query(params): Query<StalledParams>,
) -> Result<Json<Vec<OperationResponse>>, ApiError> {
    let threshold = params
        .threshold_secs
        .map(Duration::from_secs)
        .unwrap_or(state.stall_threshold);
    let operations = state.service.list_stalled_operations(threshold).await?;
    Ok(Json(OperationResponse::list(&operations, &state.service)))
}

/// POST /operations/{id}/cancel — request cancellation.
#[tracing::instrument(skip(state, req))]
pub async fn cancel<R: OperationRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<StatusCode, ApiError> {
    let id = parse_operation_id(&id)?;
    state.service.cancel_operation(id, &req.reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /operations/{id}/retry — reset a failed operation and run it again.
#[tracing::instrument(skip(state))]
pub async fn retry<R: OperationRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_operation_id(&id)?;
    state.dispatcher.retry(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn build_query(params: ListParams) -> Result<OperationQuery, ApiError> {
    let mut query = OperationQuery::new();
    if let Some(tenant_id) = params.tenant_id {
        query = query.tenant_id(parse_tenant_id(&tenant_id)?);
    }
    if let Some(status) = params.status {
        let status = status
            .parse::<OperationStatus>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        query = query.status(status);
    }
    if let Some(operation_type) = params.operation_type {
        let operation_type = operation_type
            .parse::<OperationType>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        query = query.operation_type(operation_type);
    }
    if let Some(limit) = params.limit {
        query = query.limit(limit);
    }
    if let Some(offset) = params.offset {
        query = query.offset(offset);
    }
    Ok(query)
}

pub(crate) fn parse_operation_id(id: &str) -> Result<OperationId, ApiError> {
    id.parse::<OperationId>()
        .map_err(|e| ApiError::BadRequest(format!("Invalid operation id: {e}")))
}

pub(crate) fn parse_tenant_id(id: &str) -> Result<TenantId, ApiError> {
    id.parse::<TenantId>()
        .map_err(|e| ApiError::BadRequest(format!("Invalid tenant id: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_query_parses_every_filter() {
        let tenant = TenantId::new();
        let query = build_query(ListParams {
            tenant_id: Some(tenant.to_string()),
            status: Some("in_progress".to_string()),
            operation_type: Some("tenant.delete".to_string()),
            limit: Some(10),
            offset: Some(5),
        })
        .unwrap();

        assert_eq!(query.tenant_id, Some(tenant));
        assert_eq!(query.status, Some(OperationStatus::InProgress));
        assert_eq!(query.operation_type, Some(OperationType::TenantDelete));
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, Some(5));
    }

    #[test]
    fn build_query_rejects_bad_values() {
        for params in [
            ListParams {
                tenant_id: Some("nope".to_string()),
                ..Default::default()
            },
            ListParams {
                status: Some("sleeping".to_string()),
                ..Default::default()
            },
            ListParams {
                operation_type: Some("tenant.explode".to_string()),
                ..Default::default()
            },
        ] {
            assert!(matches!(build_query(params), Err(ApiError::BadRequest(_))));
        }
    }

    #[test]
    fn operation_ids_must_be_integers() {
        assert_eq!(parse_operation_id("42").unwrap(), OperationId::new(42));
        assert!(parse_operation_id("abc").is_err());
    }
}
