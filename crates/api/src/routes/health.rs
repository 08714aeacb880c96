//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use operation_store::OperationRepository;
use serde::Serialize;

use crate::routes::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub live_tasks: usize,
}

/// GET /health — returns process health and the executor's live task count.
pub async fn check<R: OperationRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        live_tasks: state.dispatcher.executor().live_tasks(),
    })
}
