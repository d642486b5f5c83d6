//! PostgreSQL repository
//!
//! The production [`TransactionalRepository`]: a connection pool for plain
//! reads and writes, real transactions for [`in_transaction`], and the
//! operation lock rows that give the scheduler cross-replica exclusion.
//!
//! [`in_transaction`]: TransactionalRepository::in_transaction

mod queries;
mod rows;

pub use queries::{build_query, table_name};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgConnection, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::debug;

use sm_domain::errors::{DomainError, Result};
use sm_domain::labels::{apply_label_changes, LabelChange};
use sm_domain::query::Criterion;
use sm_domain::repository::{Repository, ResourceLocker, StorageAction, TransactionalRepository};
use sm_domain::types::{Object, ObjectType};

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
}

pub(crate) fn translate_sqlx_error(error: sqlx::Error) -> DomainError {
    match &error {
        sqlx::Error::RowNotFound => DomainError::not_found("row"),
        sqlx::Error::Database(db_error) => {
            match db_error.code().as_deref() {
                // unique_violation
                Some("23505") => DomainError::conflict(format!(
                    "unique constraint violation: {}",
                    db_error.message()
                )),
                // foreign_key_violation
                Some("23503") => DomainError::ExistingReferenceEntity {
                    entity: db_error.message().to_string(),
                },
                // serialization_failure / deadlock_detected are retryable
                Some("40001") | Some("40P01") => DomainError::Storage {
                    message: db_error.message().to_string(),
                    retryable: true,
                },
                _ => DomainError::Storage {
                    message: db_error.message().to_string(),
                    retryable: false,
                },
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => DomainError::Storage {
            message: error.to_string(),
            retryable: true,
        },
        _ => DomainError::Storage {
            message: error.to_string(),
            retryable: false,
        },
    }
}

#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout)
            .connect(&config.url)
            .await
            .map_err(translate_sqlx_error)?;
        Ok(Self { pool })
    }

    /// Creates the schema. Idempotent.
    pub async fn run_migrations(&self) -> Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(translate_sqlx_error)?;
        }
        Ok(())
    }
}

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS service_brokers (
        id VARCHAR(100) PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE,
        description TEXT,
        broker_url TEXT NOT NULL,
        username TEXT,
        password TEXT,
        catalog JSONB,
        labels JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        ready BOOLEAN NOT NULL DEFAULT TRUE,
        paging_sequence BIGSERIAL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS service_offerings (
        id VARCHAR(100) PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        description TEXT,
        bindable BOOLEAN NOT NULL DEFAULT FALSE,
        instances_retrievable BOOLEAN NOT NULL DEFAULT FALSE,
        bindings_retrievable BOOLEAN NOT NULL DEFAULT FALSE,
        plan_updateable BOOLEAN NOT NULL DEFAULT FALSE,
        allow_context_updates BOOLEAN NOT NULL DEFAULT FALSE,
        catalog_id VARCHAR(255) NOT NULL,
        catalog_name VARCHAR(255) NOT NULL,
        tags JSONB,
        requires JSONB,
        metadata JSONB,
        broker_id VARCHAR(100) NOT NULL REFERENCES service_brokers(id) ON DELETE CASCADE,
        labels JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        ready BOOLEAN NOT NULL DEFAULT TRUE,
        paging_sequence BIGSERIAL,
        UNIQUE (broker_id, catalog_id),
        UNIQUE (broker_id, catalog_name)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS service_plans (
        id VARCHAR(100) PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        description TEXT,
        catalog_id VARCHAR(255) NOT NULL,
        catalog_name VARCHAR(255) NOT NULL,
        free BOOLEAN NOT NULL DEFAULT FALSE,
        bindable BOOLEAN NOT NULL DEFAULT TRUE,
        plan_updateable BOOLEAN NOT NULL DEFAULT FALSE,
        supported_platforms JSONB,
        metadata JSONB,
        schemas JSONB,
        service_offering_id VARCHAR(100) NOT NULL REFERENCES service_offerings(id) ON DELETE CASCADE,
        labels JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        ready BOOLEAN NOT NULL DEFAULT TRUE,
        paging_sequence BIGSERIAL,
        UNIQUE (service_offering_id, catalog_id),
        UNIQUE (service_offering_id, catalog_name)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS platforms (
        id VARCHAR(100) PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE,
        type VARCHAR(255) NOT NULL,
        description TEXT,
        username TEXT,
        password TEXT,
        active BOOLEAN NOT NULL DEFAULT FALSE,
        last_active TIMESTAMPTZ NOT NULL,
        labels JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        ready BOOLEAN NOT NULL DEFAULT TRUE,
        paging_sequence BIGSERIAL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS visibilities (
        id VARCHAR(100) PRIMARY KEY,
        platform_id VARCHAR(100) REFERENCES platforms(id) ON DELETE CASCADE,
        service_plan_id VARCHAR(100) NOT NULL REFERENCES service_plans(id) ON DELETE CASCADE,
        labels JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        ready BOOLEAN NOT NULL DEFAULT TRUE,
        paging_sequence BIGSERIAL,
        UNIQUE (platform_id, service_plan_id)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS service_instances (
        id VARCHAR(100) PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        service_plan_id VARCHAR(100) NOT NULL REFERENCES service_plans(id),
        platform_id VARCHAR(100) NOT NULL,
        maintenance_info JSONB,
        parameters JSONB,
        dashboard_url TEXT,
        last_operation TEXT,
        usable BOOLEAN NOT NULL DEFAULT TRUE,
        shared BOOLEAN NOT NULL DEFAULT FALSE,
        labels JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        ready BOOLEAN NOT NULL DEFAULT TRUE,
        paging_sequence BIGSERIAL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS service_bindings (
        id VARCHAR(100) PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        service_instance_id VARCHAR(100) NOT NULL REFERENCES service_instances(id),
        credentials JSONB,
        parameters JSONB,
        last_operation TEXT,
        labels JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        ready BOOLEAN NOT NULL DEFAULT TRUE,
        paging_sequence BIGSERIAL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS operations (
        id VARCHAR(100) PRIMARY KEY,
        type VARCHAR(20) NOT NULL,
        state VARCHAR(20) NOT NULL,
        category VARCHAR(20) NOT NULL,
        resource_id VARCHAR(100) NOT NULL,
        resource_type VARCHAR(50) NOT NULL,
        correlation_id VARCHAR(100) NOT NULL,
        platform_id VARCHAR(100),
        errors JSONB,
        reschedule BOOLEAN NOT NULL DEFAULT FALSE,
        reschedule_timestamp TIMESTAMPTZ,
        deletion_scheduled TIMESTAMPTZ,
        labels JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        ready BOOLEAN NOT NULL DEFAULT TRUE,
        paging_sequence BIGSERIAL
    );
    "#,
    "CREATE INDEX IF NOT EXISTS idx_operations_state ON operations(state);",
    "CREATE INDEX IF NOT EXISTS idx_operations_resource ON operations(resource_type, resource_id);",
    r#"
    CREATE TABLE IF NOT EXISTS operation_locks (
        resource_type VARCHAR(50) NOT NULL,
        resource_id VARCHAR(100) NOT NULL,
        owner VARCHAR(100) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (resource_type, resource_id)
    );
    "#,
];

async fn get_in(
    conn: &mut PgConnection,
    object_type: ObjectType,
    criteria: &[Criterion],
) -> Result<Object> {
    let query = build_query(object_type, criteria, 0)?;
    let sql = format!(
        "SELECT * FROM {}{} LIMIT 1",
        table_name(object_type),
        query.where_clause
    );
    let mut q = sqlx::query(&sql);
    for bind in &query.binds {
        q = q.bind(bind);
    }
    let row: Option<PgRow> = q
        .fetch_optional(&mut *conn)
        .await
        .map_err(translate_sqlx_error)?;
    match row {
        Some(row) => rows::map_row(object_type, &row),
        None => Err(DomainError::not_found(object_type.api_name())),
    }
}

async fn list_in(
    conn: &mut PgConnection,
    object_type: ObjectType,
    criteria: &[Criterion],
    exclusive: bool,
) -> Result<Vec<Object>> {
    let query = build_query(object_type, criteria, 0)?;
    let locking = if exclusive {
        " FOR UPDATE SKIP LOCKED"
    } else {
        ""
    };
    let sql = format!(
        "SELECT * FROM {}{}{}",
        table_name(object_type),
        query.clause(),
        locking
    );
    let mut q = sqlx::query(&sql);
    for bind in &query.binds {
        q = q.bind(bind);
    }
    let result_rows: Vec<PgRow> = q
        .fetch_all(&mut *conn)
        .await
        .map_err(translate_sqlx_error)?;
    result_rows
        .iter()
        .map(|row| rows::map_row(object_type, row))
        .collect()
}

async fn count_in(
    conn: &mut PgConnection,
    object_type: ObjectType,
    criteria: &[Criterion],
) -> Result<usize> {
    let query = build_query(object_type, criteria, 0)?;
    let sql = format!(
        "SELECT COUNT(*) AS total FROM {}{}",
        table_name(object_type),
        query.where_only()
    );
    let mut q = sqlx::query(&sql);
    for bind in &query.binds {
        q = q.bind(bind);
    }
    let row = q.fetch_one(&mut *conn).await.map_err(translate_sqlx_error)?;
    let total: i64 = sqlx::Row::get(&row, "total");
    Ok(total as usize)
}

async fn create_in(conn: &mut PgConnection, mut object: Object) -> Result<Object> {
    rows::insert(conn, &mut object).await?;
    Ok(object)
}

async fn update_in(
    conn: &mut PgConnection,
    mut object: Object,
    label_changes: &[LabelChange],
) -> Result<Object> {
    apply_label_changes(&mut object.base_mut().labels, label_changes)?;
    object.base_mut().updated_at = Utc::now();
    let affected = rows::update(conn, &object).await?;
    if affected == 0 {
        return Err(DomainError::not_found(object.object_type().api_name()));
    }
    Ok(object)
}

async fn delete_in(
    conn: &mut PgConnection,
    object_type: ObjectType,
    criteria: &[Criterion],
) -> Result<()> {
    let query = build_query(object_type, criteria, 0)?;
    let sql = format!(
        "DELETE FROM {}{}",
        table_name(object_type),
        query.where_only()
    );
    let mut q = sqlx::query(&sql);
    for bind in &query.binds {
        q = q.bind(bind);
    }
    let result = q.execute(&mut *conn).await.map_err(translate_sqlx_error)?;
    if result.rows_affected() == 0 && !criteria.is_empty() {
        return Err(DomainError::not_found(object_type.api_name()));
    }
    Ok(())
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<Object> {
        let mut conn = self.pool.acquire().await.map_err(translate_sqlx_error)?;
        get_in(&mut *conn, object_type, criteria).await
    }

    async fn list(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<Vec<Object>> {
        let mut conn = self.pool.acquire().await.map_err(translate_sqlx_error)?;
        list_in(&mut *conn, object_type, criteria, false).await
    }

    async fn count(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<usize> {
        let mut conn = self.pool.acquire().await.map_err(translate_sqlx_error)?;
        count_in(&mut *conn, object_type, criteria).await
    }

    async fn create(&self, object: Object) -> Result<Object> {
        let mut conn = self.pool.acquire().await.map_err(translate_sqlx_error)?;
        create_in(&mut *conn, object).await
    }

    async fn update(&self, object: Object, label_changes: &[LabelChange]) -> Result<Object> {
        let mut conn = self.pool.acquire().await.map_err(translate_sqlx_error)?;
        update_in(&mut *conn, object, label_changes).await
    }

    async fn delete(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(translate_sqlx_error)?;
        delete_in(&mut *conn, object_type, criteria).await
    }
}

/// Repository view of one open transaction. Repository calls after the
/// transaction resolved fail with a storage error instead of touching a
/// dangling connection.
pub struct PgTxRepository {
    tx: Arc<Mutex<Option<Transaction<'static, Postgres>>>>,
}

fn closed_transaction() -> DomainError {
    DomainError::Storage {
        message: "transaction is already closed".to_string(),
        retryable: false,
    }
}

#[async_trait]
impl Repository for PgTxRepository {
    async fn get(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<Object> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed_transaction)?;
        get_in(&mut **tx, object_type, criteria).await
    }

    async fn list(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<Vec<Object>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed_transaction)?;
        list_in(&mut **tx, object_type, criteria, false).await
    }

    async fn count(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<usize> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed_transaction)?;
        count_in(&mut **tx, object_type, criteria).await
    }

    async fn create(&self, object: Object) -> Result<Object> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed_transaction)?;
        create_in(&mut **tx, object).await
    }

    async fn update(&self, object: Object, label_changes: &[LabelChange]) -> Result<Object> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed_transaction)?;
        update_in(&mut **tx, object, label_changes).await
    }

    async fn delete(&self, object_type: ObjectType, criteria: &[Criterion]) -> Result<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed_transaction)?;
        delete_in(&mut **tx, object_type, criteria).await
    }

    async fn list_exclusively(
        &self,
        object_type: ObjectType,
        criteria: &[Criterion],
    ) -> Result<Vec<Object>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed_transaction)?;
        list_in(&mut **tx, object_type, criteria, true).await
    }
}

#[async_trait]
impl TransactionalRepository for PostgresRepository {
    async fn in_transaction(&self, work: StorageAction) -> Result<Option<Object>> {
        let tx = self.pool.begin().await.map_err(translate_sqlx_error)?;
        let cell = Arc::new(Mutex::new(Some(tx)));
        let tx_repository: Arc<dyn Repository> = Arc::new(PgTxRepository {
            tx: Arc::clone(&cell),
        });

        let result = work(tx_repository).await;
        let tx = cell.lock().await.take().ok_or_else(closed_transaction)?;
        match result {
            Ok(result) => {
                tx.commit().await.map_err(translate_sqlx_error)?;
                Ok(result)
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    debug!("transaction rollback failed: {}", rollback_error);
                }
                Err(error)
            }
        }
    }
}

#[async_trait]
impl ResourceLocker for PostgresRepository {
    async fn try_lock(
        &self,
        resource_type: ObjectType,
        resource_id: &str,
        owner: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO operation_locks (resource_type, resource_id, owner, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (resource_type, resource_id) DO NOTHING
            "#,
        )
        .bind(resource_type.api_name())
        .bind(resource_id)
        .bind(owner)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(translate_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn unlock(&self, resource_type: ObjectType, resource_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM operation_locks WHERE resource_type = $1 AND resource_id = $2")
            .bind(resource_type.api_name())
            .bind(resource_id)
            .execute(&self.pool)
            .await
            .map_err(translate_sqlx_error)?;
        Ok(())
    }

    async fn lock_owner(
        &self,
        resource_type: ObjectType,
        resource_id: &str,
    ) -> Result<Option<String>> {
        let row: Option<PgRow> = sqlx::query(
            "SELECT owner FROM operation_locks WHERE resource_type = $1 AND resource_id = $2",
        )
        .bind(resource_type.api_name())
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(translate_sqlx_error)?;
        Ok(row.map(|r| sqlx::Row::get(&r, "owner")))
    }
}
