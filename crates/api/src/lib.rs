//! HTTP façade for the tenant operations control plane.
//!
//! Provides REST endpoints to enqueue tenant lifecycle work and to query,
//! cancel and retry the resulting operations, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod provisioning;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use common::SystemClock;
use domain::OperationPolicies;
use metrics_exporter_prometheus::PrometheusHandle;
use operation_store::{InMemoryOperationRepository, OperationRepository};
use orchestrator::{OperationDispatcher, OperationExecutor, OperationService, TaskCatalog};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use provisioning::InMemoryProvisioner;
use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<R: OperationRepository + 'static>(
    state: Arc<AppState<R>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<R>))
        .route("/operations", get(routes::operations::list::<R>))
        .route("/operations/stalled", get(routes::operations::stalled::<R>))
        .route("/operations/{id}", get(routes::operations::get::<R>))
        .route("/operations/{id}/cancel", post(routes::operations::cancel::<R>))
        .route("/operations/{id}/retry", post(routes::operations::retry::<R>))
        .route("/tenants", post(routes::tenants::create::<R>))
        .route("/tenants/{id}", delete(routes::tenants::delete::<R>))
        .route("/tenants/{id}/suspend", post(routes::tenants::suspend::<R>))
        .route("/tenants/{id}/resume", post(routes::tenants::resume::<R>))
        .route("/tenants/{id}/migrate", post(routes::tenants::migrate::<R>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires service, executor and dispatcher over `repo`.
pub fn create_state<R: OperationRepository + 'static>(
    repo: R,
    config: &Config,
    catalog: TaskCatalog,
) -> Arc<AppState<R>> {
    let service = Arc::new(OperationService::new(
        repo,
        Arc::new(SystemClock),
        Arc::new(OperationPolicies::default()),
    ));
    let executor = OperationExecutor::new(Arc::clone(&service), config.executor_config());
    let dispatcher = OperationDispatcher::new(executor, catalog);

    Arc::new(AppState {
        service,
        dispatcher,
        stall_threshold: config.stall_threshold,
    })
}

/// Creates an in-memory application state backed by a simulated provisioner.
pub fn create_default_state(
    config: &Config,
    provisioner: &InMemoryProvisioner,
) -> Arc<AppState<InMemoryOperationRepository>> {
    create_state(
        InMemoryOperationRepository::new(),
        config,
        provisioner.task_catalog(),
    )
}
