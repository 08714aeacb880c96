use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{NewOperation, Operation, OperationRecord, OperationStatus, Payload};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    OperationId, OperationQuery, RepositoryError, Result, TenantId, Version,
    store::OperationRepository,
};

const COLUMNS: &str = "id, operation_type, status, tenant_id, parameters, result, error_message, \
     created_at, started_at, completed_at, updated_at, version, retry_count, last_progress";

/// PostgreSQL-backed operation repository.
#[derive(Clone)]
pub struct PostgresOperationRepository {
    pool: PgPool,
}

impl PostgresOperationRepository {
    /// Creates a new PostgreSQL operation repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_operation(row: PgRow) -> Result<Operation> {
        let operation_type: String = row.try_get("operation_type")?;
        let status: String = row.try_get("status")?;
        let retry_count: i32 = row.try_get("retry_count")?;
        let last_progress: Option<i16> = row.try_get("last_progress")?;

        Ok(Operation::restore(OperationRecord {
            id: OperationId::new(row.try_get("id")?),
            operation_type: operation_type
                .parse()
                .map_err(|e| RepositoryError::Corrupt(format!("{e}")))?,
            status: status
                .parse()
                .map_err(|e| RepositoryError::Corrupt(format!("{e}")))?,
            tenant_id: row
                .try_get::<Option<Uuid>, _>("tenant_id")?
                .map(TenantId::from_uuid),
            parameters: json_to_payload(row.try_get("parameters")?)?,
            result: row
                .try_get::<Option<serde_json::Value>, _>("result")?
                .map(json_to_payload)
                .transpose()?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            updated_at: row.try_get("updated_at")?,
            version: Version::new(row.try_get("version")?),
            retry_count: u32::try_from(retry_count)
                .map_err(|_| RepositoryError::Corrupt(format!("retry_count {retry_count}")))?,
            last_progress: last_progress
                .map(u8::try_from)
                .transpose()
                .map_err(|_| RepositoryError::Corrupt("last_progress out of range".to_string()))?,
        }))
    }

    async fn fetch_all(&self, sql: &str, status: Option<&str>) -> Result<Vec<Operation>> {
        let mut query = sqlx::query(sql);
        if let Some(status) = status {
            query = query.bind(status);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_operation).collect()
    }
}

fn json_to_payload(value: serde_json::Value) -> Result<Payload> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(RepositoryError::Corrupt(format!(
            "expected a JSON object payload, found {other}"
        ))),
    }
}

fn payload_to_json(payload: &Payload) -> serde_json::Value {
    serde_json::Value::Object(payload.clone())
}

#[async_trait]
impl OperationRepository for PostgresOperationRepository {
    async fn create(&self, new: NewOperation) -> Result<Operation> {
        let id: i64 =
            sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence('operations', 'id'))")
                .fetch_one(&self.pool)
                .await?;
        let operation = Operation::create(OperationId::new(id), new);

        sqlx::query(
            r#"
            INSERT INTO operations (id, operation_type, status, tenant_id, parameters, created_at, updated_at, version, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0)
            "#,
        )
        .bind(operation.id().as_i64())
        .bind(operation.operation_type().as_str())
        .bind(operation.status().as_str())
        .bind(operation.tenant_id().map(|t| t.as_uuid()))
        .bind(payload_to_json(operation.parameters()))
        .bind(operation.created_at())
        .bind(operation.updated_at())
        .bind(operation.version().as_i64())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("operations_pkey")
            {
                return RepositoryError::Duplicate(operation.id());
            }
            RepositoryError::Database(e)
        })?;

        Ok(operation)
    }

    async fn find_by_id(&self, id: OperationId) -> Result<Option<Operation>> {
        let row: Option<PgRow> =
            sqlx::query(&format!("SELECT {COLUMNS} FROM operations WHERE id = $1"))
                .bind(id.as_i64())
                .fetch_optional(&self.pool)
                .await?;

        row.map(Self::row_to_operation).transpose()
    }

    async fn find_by_tenant_id(&self, tenant_id: TenantId) -> Result<Vec<Operation>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM operations WHERE tenant_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_operation).collect()
    }

    async fn find_by_status(&self, status: OperationStatus) -> Result<Vec<Operation>> {
        self.fetch_all(
            &format!(
                "SELECT {COLUMNS} FROM operations WHERE status = $1 ORDER BY created_at ASC, id ASC"
            ),
            Some(status.as_str()),
        )
        .await
    }

    async fn find_incomplete(&self) -> Result<Vec<Operation>> {
        self.fetch_all(
            &format!(
                "SELECT {COLUMNS} FROM operations \
                 WHERE status NOT IN ('completed', 'cancelled') ORDER BY created_at ASC, id ASC"
            ),
            None,
        )
        .await
    }

    async fn query(&self, query: OperationQuery) -> Result<Vec<Operation>> {
        let mut sql = format!("SELECT {COLUMNS} FROM operations WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.tenant_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND tenant_id = ${param_count}"));
        }
        if query.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }
        if query.operation_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND operation_type = ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at DESC, id DESC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(tenant_id) = query.tenant_id {
            sqlx_query = sqlx_query.bind(tenant_id.as_uuid());
        }
        if let Some(status) = query.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(operation_type) = query.operation_type {
            sqlx_query = sqlx_query.bind(operation_type.as_str());
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_operation).collect()
    }

    async fn update(&self, operation: &Operation) -> Result<Operation> {
        let new_version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE operations SET
                status = $3,
                result = $4,
                error_message = $5,
                started_at = $6,
                completed_at = $7,
                updated_at = $8,
                retry_count = $9,
                last_progress = $10,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(operation.id().as_i64())
        .bind(operation.version().as_i64())
        .bind(operation.status().as_str())
        .bind(operation.result().map(payload_to_json))
        .bind(operation.error_message())
        .bind(operation.started_at())
        .bind(operation.completed_at())
        .bind(operation.updated_at())
        .bind(i32::try_from(operation.retry_count()).unwrap_or(i32::MAX))
        .bind(operation.last_progress().map(i16::from))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(version) = new_version {
            let mut updated = operation.clone();
            updated.set_version(Version::new(version));
            return Ok(updated);
        }

        // Nothing matched: either the row is gone or another writer moved it
        let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM operations WHERE id = $1")
            .bind(operation.id().as_i64())
            .fetch_optional(&self.pool)
            .await?;

        match actual {
            None => Err(RepositoryError::NotFound(operation.id())),
            Some(actual) => {
                tracing::debug!(
                    operation_id = %operation.id(),
                    expected = %operation.version(),
                    actual,
                    "optimistic concurrency conflict"
                );
                Err(RepositoryError::ConcurrentModification {
                    operation_id: operation.id(),
                    expected: operation.version(),
                    actual: Version::new(actual),
                })
            }
        }
    }
}
