//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p operation-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Duration;
use common::{Clock, SystemClock};
use domain::{NewOperation, OperationStatus, OperationType, Payload};
use operation_store::{
    OperationId, OperationQuery, OperationRepository, OperationRepositoryExt,
    PostgresOperationRepository, RepositoryError, TenantId, Version,
};
use serde_json::json;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_operations_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh repository with its own pool and an empty table
async fn get_test_repo() -> PostgresOperationRepository {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE operations RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    PostgresOperationRepository::new(pool)
}

fn params(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap()
}

fn new_operation(tenant_id: Option<TenantId>) -> NewOperation {
    NewOperation::new(
        OperationType::TenantCreate,
        tenant_id,
        params(json!({"name": "acme", "region": "eu1"})),
        SystemClock.now(),
    )
}

#[tokio::test]
async fn create_and_find_by_id() {
    let repo = get_test_repo().await;
    let tenant = TenantId::new();

    let created = repo.create(new_operation(Some(tenant))).await.unwrap();
    assert_eq!(created.status(), OperationStatus::Pending);
    assert_eq!(created.version(), Version::first());

    let loaded = repo.find_by_id(created.id()).await.unwrap().unwrap();
    assert_eq!(loaded, created);
    assert_eq!(loaded.tenant_id(), Some(tenant));
}

#[tokio::test]
async fn ids_come_from_the_sequence() {
    let repo = get_test_repo().await;

    let first = repo.create(new_operation(None)).await.unwrap();
    let second = repo.create(new_operation(None)).await.unwrap();

    assert!(second.id() > first.id());
}

#[tokio::test]
async fn missing_operation_is_none() {
    let repo = get_test_repo().await;
    assert!(repo.find_by_id(OperationId::new(4242)).await.unwrap().is_none());
    assert!(!repo.exists(OperationId::new(4242)).await.unwrap());
}

#[tokio::test]
async fn completed_operation_round_trips_bit_equal() {
    let repo = get_test_repo().await;
    let clock = SystemClock;

    let mut op = repo.create(new_operation(Some(TenantId::new()))).await.unwrap();
    op.start(clock.now()).unwrap();
    let mut op = repo.update(&op).await.unwrap();
    op.complete(
        params(json!({"endpoint": "https://acme.eu1", "nodes": [1, 2, 3], "ok": true})),
        clock.now(),
    )
    .unwrap();
    let saved = repo.update(&op).await.unwrap();

    let loaded = repo.get(saved.id()).await.unwrap();
    assert_eq!(loaded, saved);
    assert_eq!(loaded.version(), Version::new(3));
    assert_eq!(loaded.last_progress(), Some(100));
}

#[tokio::test]
async fn failed_then_retried_operation_round_trips() {
    let repo = get_test_repo().await;
    let clock = SystemClock;
    let policies = domain::OperationPolicies::default();

    let mut op = repo.create(new_operation(None)).await.unwrap();
    op.start(clock.now()).unwrap();
    let mut op = repo.update(&op).await.unwrap();
    op.fail("db unreachable", clock.now()).unwrap();
    let mut op = repo.update(&op).await.unwrap();
    assert_eq!(op.error_message(), Some("db unreachable"));

    op.retry(&policies, clock.now()).unwrap();
    let saved = repo.update(&op).await.unwrap();

    let loaded = repo.get(saved.id()).await.unwrap();
    assert_eq!(loaded, saved);
    assert_eq!(loaded.status(), OperationStatus::Pending);
    assert_eq!(loaded.retry_count(), 1);
    assert!(loaded.started_at().is_none());
    assert!(loaded.error_message().is_none());
}

#[tokio::test]
async fn stale_update_is_a_concurrent_modification() {
    let repo = get_test_repo().await;
    let clock = SystemClock;

    let mut op = repo.create(new_operation(None)).await.unwrap();
    op.start(clock.now()).unwrap();
    let running = repo.update(&op).await.unwrap();

    let mut winner = running.clone();
    winner
        .complete(params(json!({"by": "winner"})), clock.now())
        .unwrap();
    repo.update(&winner).await.unwrap();

    let mut loser = running.clone();
    loser.fail("late", clock.now()).unwrap();
    let err = repo.update(&loser).await.unwrap_err();

    assert!(matches!(
        err,
        RepositoryError::ConcurrentModification { expected, actual, .. }
            if expected == Version::new(2) && actual == Version::new(3)
    ));
    let stored = repo.get(op.id()).await.unwrap();
    assert_eq!(stored.status(), OperationStatus::Completed);
    assert_eq!(stored.result().unwrap()["by"], "winner");
}

#[tokio::test]
async fn update_of_unknown_row_is_not_found() {
    let repo = get_test_repo().await;
    let op = domain::Operation::create(OperationId::new(99_999), new_operation(None));

    assert!(matches!(
        repo.update(&op).await,
        Err(RepositoryError::NotFound(id)) if id == OperationId::new(99_999)
    ));
}

#[tokio::test]
async fn find_by_tenant_is_newest_first() {
    let repo = get_test_repo().await;
    let tenant = TenantId::new();
    let base = SystemClock.now();

    for offset in [0, 20, 10] {
        let mut new = new_operation(Some(tenant));
        new.created_at = base + Duration::seconds(offset);
        repo.create(new).await.unwrap();
    }
    repo.create(new_operation(Some(TenantId::new())))
        .await
        .unwrap();

    let offsets: Vec<_> = repo
        .find_by_tenant_id(tenant)
        .await
        .unwrap()
        .iter()
        .map(|op| (op.created_at() - base).num_seconds())
        .collect();
    assert_eq!(offsets, vec![20, 10, 0]);
}

#[tokio::test]
async fn find_by_status_and_incomplete() {
    let repo = get_test_repo().await;
    let clock = SystemClock;

    let pending = repo.create(new_operation(None)).await.unwrap();

    let mut running = repo.create(new_operation(None)).await.unwrap();
    running.start(clock.now()).unwrap();
    let running = repo.update(&running).await.unwrap();

    let mut cancelled = repo.create(new_operation(None)).await.unwrap();
    cancelled.cancel("user aborted", clock.now()).unwrap();
    repo.update(&cancelled).await.unwrap();

    let in_progress = repo
        .find_by_status(OperationStatus::InProgress)
        .await
        .unwrap();
    assert_eq!(in_progress.len(), 1);
    assert_eq!(in_progress[0].id(), running.id());

    let ids: Vec<_> = repo
        .find_incomplete()
        .await
        .unwrap()
        .iter()
        .map(|op| op.id())
        .collect();
    assert_eq!(ids, vec![pending.id(), running.id()]);
}

#[tokio::test]
async fn query_with_filters_limit_and_offset() {
    let repo = get_test_repo().await;
    let tenant = TenantId::new();
    let base = SystemClock.now();

    for offset in 0..5 {
        let mut new = new_operation(Some(tenant));
        new.created_at = base + Duration::seconds(offset);
        repo.create(new).await.unwrap();
    }
    let mut other = new_operation(Some(tenant));
    other.operation_type = OperationType::TenantDelete;
    repo.create(other).await.unwrap();

    let creates = repo
        .query(
            OperationQuery::for_tenant(tenant)
                .operation_type(OperationType::TenantCreate)
                .status(OperationStatus::Pending),
        )
        .await
        .unwrap();
    assert_eq!(creates.len(), 5);

    let page = repo
        .query(
            OperationQuery::for_tenant(tenant)
                .operation_type(OperationType::TenantCreate)
                .offset(1)
                .limit(2),
        )
        .await
        .unwrap();
    let offsets: Vec<_> = page
        .iter()
        .map(|op| (op.created_at() - base).num_seconds())
        .collect();
    assert_eq!(offsets, vec![3, 2]);
}

#[tokio::test]
async fn unknown_type_in_row_is_corrupt() {
    let repo = get_test_repo().await;
    let op = repo.create(new_operation(None)).await.unwrap();

    sqlx::query("UPDATE operations SET operation_type = 'tenant.explode' WHERE id = $1")
        .bind(op.id().as_i64())
        .execute(repo.pool())
        .await
        .unwrap();

    assert!(matches!(
        repo.find_by_id(op.id()).await,
        Err(RepositoryError::Corrupt(_))
    ));
}
