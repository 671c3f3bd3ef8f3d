//! Postgres-backed implementation of the metadata store.
//!
//! # What this module is
//! This module implements the `MetadataStore` trait using Postgres (via `sqlx`) as the durable,
//! shared record of namespaces, instances and orchestration jobs.
//!
//! # What this module is NOT
//! This store does not hold instance *storage*. Key/value payloads live on the remote admin
//! endpoints; this store only tracks which instances exist and where.
//!
//! # Key invariants
//! - `instances` rows reference `namespaces` with `ON DELETE CASCADE`.
//! - `(namespace_id, object_id)` and `(namespace_id, name)` are unique.
//! - `create_instances` runs inside one transaction: a failing row rolls back the batch.
//! - Job transitions are guarded in SQL (`status NOT IN terminal`), so a terminal job cannot be
//!   moved even by concurrent writers.
//!
//! # Security model / threat assumptions
//! - Database URLs may contain credentials; avoid logging them.
//! - No dynamic SQL; every statement is a fixed string with bound parameters.
//!
//! # Concurrency model
//! - The store is shared across async handlers; `sqlx::PgPool` manages concurrency.
//! - Pool sizing and timeouts come from [`PostgresConfig`] so a stalled database fails fast
//!   instead of hanging an orchestration.
//!
//! # Operational notes
//! Migrations are executed at startup via `sqlx::migrate!("./migrations")` so handlers can assume
//! the schema exists.
use super::{MetadataStore, StoreError, StoreResult};
use crate::config::PostgresConfig;
use crate::model::{
    Instance, Job, JobCompletion, JobFilter, JobStatus, JobType, Namespace, StorageBackend,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;
use std::time::Duration;

const TERMINAL_STATUSES: [&str; 3] = ["completed", "failed", "cancelled"];

const NAMESPACE_COLUMNS: &str = "id, name, class_name, script_name, storage_backend, endpoint_url, \
     admin_hook_enabled, color, created_at, updated_at";
const INSTANCE_COLUMNS: &str = "id, namespace_id, name, object_id, last_accessed, \
     storage_size_bytes, has_alarm, tags, color, created_at, updated_at";
const JOB_COLUMNS: &str = "id, type, status, namespace_id, instance_id, created_by, progress, \
     result, error, created_at, started_at, completed_at";

/// Durable metadata store backed by Postgres.
///
/// # Example
/// ```rust,no_run
/// use controlplane::config::PostgresConfig;
/// use controlplane::store::postgres::PostgresStore;
///
/// async fn open(pg: PostgresConfig) {
///     let _ = PostgresStore::connect(&pg).await;
/// }
/// ```
pub struct PostgresStore {
    pool: PgPool,
}

/// Row shape for the `namespaces` table.
///
/// DB-facing structs stay separate from the domain model so string columns are parsed into
/// enums in one place.
#[derive(Debug, Clone, FromRow)]
struct DbNamespace {
    id: String,
    name: String,
    class_name: Option<String>,
    script_name: Option<String>,
    storage_backend: String,
    endpoint_url: Option<String>,
    admin_hook_enabled: bool,
    color: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Row shape for the `instances` table.
#[derive(Debug, Clone, FromRow)]
struct DbInstance {
    id: String,
    namespace_id: String,
    name: Option<String>,
    object_id: String,
    last_accessed: Option<DateTime<Utc>>,
    storage_size_bytes: Option<i64>,
    has_alarm: bool,
    tags: Vec<String>,
    color: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Row shape for the `jobs` table.
#[derive(Debug, Clone, FromRow)]
struct DbJob {
    id: String,
    #[sqlx(rename = "type")]
    job_type: String,
    status: String,
    namespace_id: Option<String>,
    instance_id: Option<String>,
    created_by: Option<String>,
    progress: i32,
    result: Option<Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl PostgresStore {
    /// Connect to Postgres and run embedded migrations.
    ///
    /// # Errors
    /// - Connection, migration, or pool setup failures.
    ///
    /// # Security notes
    /// - Avoid logging `pg.url` as it may contain credentials.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, true).await
    }

    /// Connect without running migrations, for tests that manage the schema themselves.
    #[cfg(any(test, feature = "pg-tests"))]
    pub async fn connect_without_migrations(pg: &PostgresConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, false).await
    }

    async fn connect_internal(pg: &PostgresConfig, run_migrations: bool) -> StoreResult<Self> {
        // `acquire_timeout` bounds how long a request waits for a pooled connection;
        // `connect_timeout` bounds establishing a new physical connection.
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let pool = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options);
        let pool = tokio::time::timeout(Duration::from_millis(pg.connect_timeout_ms), pool)
            .await
            .map_err(|_| StoreError::Unexpected(anyhow!("postgres connect timed out")))??;

        if run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
        }

        Ok(Self { pool })
    }

    async fn job_exists(&self, id: &str) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM jobs WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    /// Resolve why a guarded job update touched no rows.
    async fn job_transition_error(&self, id: &str) -> StoreError {
        match self.job_exists(id).await {
            Ok(true) => StoreError::Conflict("job is terminal".into()),
            Ok(false) => StoreError::NotFound("job".into()),
            Err(err) => err,
        }
    }
}

async fn insert_instance(
    tx: &mut Transaction<'_, Postgres>,
    instance: &Instance,
) -> StoreResult<()> {
    let insert = sqlx::query(
        r#"INSERT INTO instances (id, namespace_id, name, object_id, last_accessed, storage_size_bytes, has_alarm, tags, color, created_at, updated_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
    )
    .bind(&instance.id)
    .bind(&instance.namespace_id)
    .bind(&instance.name)
    .bind(&instance.object_id)
    .bind(instance.last_accessed)
    .bind(instance.storage_size_bytes)
    .bind(instance.has_alarm)
    .bind(&instance.tags)
    .bind(&instance.color)
    .bind(instance.created_at)
    .bind(instance.updated_at)
    .execute(&mut **tx)
    .await;
    match insert {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict("instance exists".into())),
        Err(err) if is_foreign_key_violation(&err) => {
            Err(StoreError::NotFound("namespace".into()))
        }
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    // -----------------------------
    // Namespaces
    // -----------------------------

    async fn list_namespaces(&self) -> StoreResult<Vec<Namespace>> {
        let rows = sqlx::query_as::<_, DbNamespace>(&format!(
            "SELECT {NAMESPACE_COLUMNS} FROM namespaces ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(namespace_from_db).collect()
    }

    async fn get_namespace(&self, id: &str) -> StoreResult<Namespace> {
        let row = sqlx::query_as::<_, DbNamespace>(&format!(
            "SELECT {NAMESPACE_COLUMNS} FROM namespaces WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => namespace_from_db(row),
            None => Err(StoreError::NotFound("namespace".into())),
        }
    }

    async fn find_namespace_by_name(&self, name: &str) -> StoreResult<Option<Namespace>> {
        let row = sqlx::query_as::<_, DbNamespace>(&format!(
            "SELECT {NAMESPACE_COLUMNS} FROM namespaces WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(namespace_from_db).transpose()
    }

    async fn create_namespace(&self, namespace: Namespace) -> StoreResult<Namespace> {
        let insert = sqlx::query(
            r#"INSERT INTO namespaces (id, name, class_name, script_name, storage_backend, endpoint_url, admin_hook_enabled, color, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        )
        .bind(&namespace.id)
        .bind(&namespace.name)
        .bind(&namespace.class_name)
        .bind(&namespace.script_name)
        .bind(namespace.storage_backend.as_str())
        .bind(&namespace.endpoint_url)
        .bind(namespace.admin_hook_enabled)
        .bind(&namespace.color)
        .bind(namespace.created_at)
        .bind(namespace.updated_at)
        .execute(&self.pool)
        .await;
        match insert {
            Ok(_) => Ok(namespace),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::Conflict("namespace exists".into()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_namespace(&self, id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM namespaces WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("namespace".into()));
        }
        Ok(())
    }

    // -----------------------------
    // Instances
    // -----------------------------

    async fn get_instance(&self, id: &str) -> StoreResult<Instance> {
        let row = sqlx::query_as::<_, DbInstance>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(instance_from_db)
            .ok_or_else(|| StoreError::NotFound("instance".into()))
    }

    async fn find_instance_by_name(
        &self,
        namespace_id: &str,
        name: &str,
    ) -> StoreResult<Option<Instance>> {
        let row = sqlx::query_as::<_, DbInstance>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE namespace_id = $1 AND (name = $2 OR object_id = $2) LIMIT 1"
        ))
        .bind(namespace_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(instance_from_db))
    }

    async fn list_instances(&self, namespace_id: &str) -> StoreResult<Vec<Instance>> {
        let rows = sqlx::query_as::<_, DbInstance>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE namespace_id = $1 ORDER BY object_id"
        ))
        .bind(namespace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(instance_from_db).collect())
    }

    async fn create_instance(&self, instance: Instance) -> StoreResult<Instance> {
        let mut tx = self.pool.begin().await?;
        insert_instance(&mut tx, &instance).await?;
        tx.commit().await?;
        Ok(instance)
    }

    /// Insert every row in one transaction.
    ///
    /// Returning early drops `tx`, which rolls the transaction back, so a conflict on any row
    /// leaves the table untouched.
    async fn create_instances(&self, instances: Vec<Instance>) -> StoreResult<Vec<Instance>> {
        let mut tx = self.pool.begin().await?;
        for instance in &instances {
            insert_instance(&mut tx, instance).await?;
        }
        tx.commit().await?;
        Ok(instances)
    }

    async fn delete_instance(&self, id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM instances WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("instance".into()));
        }
        Ok(())
    }

    // -----------------------------
    // Jobs
    // -----------------------------

    async fn create_job(&self, job: Job) -> StoreResult<Job> {
        let insert = sqlx::query(
            r#"INSERT INTO jobs (id, type, status, namespace_id, instance_id, created_by, progress, result, error, created_at, started_at, completed_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(&job.id)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(&job.namespace_id)
        .bind(&job.instance_id)
        .bind(&job.created_by)
        .bind(i32::from(job.progress))
        .bind(&job.result)
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await;
        match insert {
            Ok(_) => Ok(job),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict("job exists".into())),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_job(&self, id: &str) -> StoreResult<Job> {
        let row = sqlx::query_as::<_, DbJob>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => job_from_db(row),
            None => Err(StoreError::NotFound("job".into())),
        }
    }

    async fn list_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, DbJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE ($1::TEXT IS NULL OR status = $1) AND ($2::TEXT IS NULL OR type = $2)
             ORDER BY created_at DESC, id
             LIMIT $3"
        ))
        .bind(filter.status.map(|status| status.as_str()))
        .bind(filter.job_type.map(|job_type| job_type.as_str()))
        .bind(filter.limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(job_from_db).collect()
    }

    async fn update_job_progress(&self, id: &str, progress: u8) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET progress = GREATEST(progress, $2) WHERE id = $1 AND status <> ALL($3)",
        )
        .bind(id)
        .bind(i32::from(progress.min(100)))
        .bind(&TERMINAL_STATUSES[..])
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.job_transition_error(id).await);
        }
        Ok(())
    }

    async fn finish_job(&self, id: &str, completion: JobCompletion) -> StoreResult<Job> {
        let row = sqlx::query_as::<_, DbJob>(&format!(
            "UPDATE jobs SET status = $2, progress = $3, result = $4, error = $5, completed_at = $6
             WHERE id = $1 AND status <> ALL($7)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(id)
        .bind(completion.status.as_str())
        .bind(i32::from(completion.progress.min(100)))
        .bind(&completion.result)
        .bind(&completion.error)
        .bind(completion.completed_at)
        .bind(&TERMINAL_STATUSES[..])
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => job_from_db(row),
            None => Err(self.job_transition_error(id).await),
        }
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23503").unwrap_or(false);
    }
    false
}

fn namespace_from_db(row: DbNamespace) -> StoreResult<Namespace> {
    Ok(Namespace {
        id: row.id,
        name: row.name,
        class_name: row.class_name,
        script_name: row.script_name,
        storage_backend: StorageBackend::from_str(&row.storage_backend)
            .map_err(|err| StoreError::Unexpected(anyhow!(err)))?,
        endpoint_url: row.endpoint_url,
        admin_hook_enabled: row.admin_hook_enabled,
        color: row.color,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn instance_from_db(row: DbInstance) -> Instance {
    Instance {
        id: row.id,
        namespace_id: row.namespace_id,
        name: row.name,
        object_id: row.object_id,
        last_accessed: row.last_accessed,
        storage_size_bytes: row.storage_size_bytes,
        has_alarm: row.has_alarm,
        tags: row.tags,
        color: row.color,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn job_from_db(row: DbJob) -> StoreResult<Job> {
    Ok(Job {
        id: row.id,
        job_type: JobType::from_str(&row.job_type)
            .map_err(|err| StoreError::Unexpected(anyhow!(err)))?,
        status: JobStatus::from_str(&row.status)
            .map_err(|err| StoreError::Unexpected(anyhow!(err)))?,
        namespace_id: row.namespace_id,
        instance_id: row.instance_id,
        created_by: row.created_by,
        progress: row.progress.clamp(0, 100) as u8,
        result: row.result,
        error: row.error,
        created_at: row.created_at,
        started_at: row.started_at,
        completed_at: row.completed_at,
    })
}
