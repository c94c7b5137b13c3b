use anyhow::{Context, Result};
use db_backup_core::{DatabaseConfig, ErrorKind, JobOutcome};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::path::PathBuf;
use uuid::Uuid;

use crate::store::{ConfigRegistry, PersistenceError, ResultSink};

/// Postgres-backed registry and result sink.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connect to postgres")?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS databases (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                db_name TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .context("create databases table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS backups (
                id UUID PRIMARY KEY,
                database_id TEXT NOT NULL,
                database_name TEXT NOT NULL,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                error BOOLEAN NOT NULL,
                error_kind TEXT,
                error_message TEXT,
                size_bytes BIGINT,
                checksum TEXT,
                started_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .context("create backups table")?;

        Ok(())
    }

    /// Registers a database, replacing any registration with the same id.
    pub async fn insert_config(&self, config: &DatabaseConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO databases (id, name, type, host, port, username, password, db_name)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, type = EXCLUDED.type,
             host = EXCLUDED.host, port = EXCLUDED.port, username = EXCLUDED.username,
             password = EXCLUDED.password, db_name = EXCLUDED.db_name",
        )
        .bind(&config.id)
        .bind(&config.name)
        .bind(&config.engine)
        .bind(&config.host)
        .bind(i32::from(config.port))
        .bind(&config.username)
        .bind(&config.password)
        .bind(&config.database)
        .execute(&self.pool)
        .await
        .context("insert database registration")?;
        Ok(())
    }

    /// Most recent outcomes first.
    pub async fn list_outcomes(&self, limit: usize) -> Result<Vec<JobOutcome>> {
        let rows = sqlx::query(
            "SELECT database_id, database_name, name, url, error, error_kind, error_message,
             size_bytes, checksum, started_at, created_at
             FROM backups ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("list backup outcomes")?;

        Ok(rows.iter().map(pg_row_to_outcome).collect())
    }
}

#[async_trait::async_trait]
impl ConfigRegistry for PostgresStore {
    async fn list(&self) -> Result<Vec<DatabaseConfig>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT id, name, type, host, port, username, password, db_name
             FROM databases ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("list database registrations")?;

        let configs = rows
            .iter()
            .map(pg_row_to_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(configs)
    }
}

#[async_trait::async_trait]
impl ResultSink for PostgresStore {
    async fn record(&self, outcome: &JobOutcome) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO backups (id, database_id, database_name, name, url, error, error_kind,
             error_message, size_bytes, checksum, started_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(Uuid::new_v4())
        .bind(&outcome.database_id)
        .bind(&outcome.database_name)
        .bind(&outcome.artifact_name)
        .bind(outcome.artifact_path.to_string_lossy().into_owned())
        .bind(!outcome.success)
        .bind(outcome.error_kind.map(|k| k.as_str()))
        .bind(&outcome.error_message)
        .bind(outcome.size_bytes.map(|s| s as i64))
        .bind(&outcome.checksum)
        .bind(outcome.started_at)
        .bind(outcome.finished_at)
        .execute(&self.pool)
        .await
        .context("insert backup outcome")?;
        Ok(())
    }
}

fn pg_row_to_config(row: &PgRow) -> Result<DatabaseConfig> {
    let id: String = row.get("id");
    let port: i32 = row.get("port");
    let port = u16::try_from(port)
        .with_context(|| format!("database {id} has out-of-range port {port}"))?;
    Ok(DatabaseConfig {
        name: row.get("name"),
        engine: row.get("type"),
        host: row.get("host"),
        port,
        username: row.get("username"),
        password: row.get("password"),
        database: row.get("db_name"),
        id,
    })
}

fn pg_row_to_outcome(row: &PgRow) -> JobOutcome {
    let error: bool = row.get("error");
    let error_kind: Option<String> = row.get("error_kind");
    let size_bytes: Option<i64> = row.get("size_bytes");
    JobOutcome {
        database_id: row.get("database_id"),
        database_name: row.get("database_name"),
        artifact_name: row.get("name"),
        artifact_path: PathBuf::from(row.get::<String, _>("url")),
        success: !error,
        error_kind: error_kind.as_deref().and_then(ErrorKind::parse),
        error_message: row.get("error_message"),
        size_bytes: size_bytes.map(|s| s as u64),
        checksum: row.get("checksum"),
        started_at: row.get("started_at"),
        finished_at: row.get("created_at"),
    }
}
