use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use db_backup_core::{DatabaseConfig, ErrorKind, JobOutcome};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::store::{ConfigRegistry, PersistenceError, ResultSink};

/// SQLite-backed registry and result sink. Each method opens a fresh connection.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let store = Self { db_path };
        store.init_db()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .with_context(|| format!("open sqlite store {}", self.db_path.display()))
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS databases (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                db_name TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS backups (
                id TEXT PRIMARY KEY,
                database_id TEXT NOT NULL,
                database_name TEXT NOT NULL,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                error INTEGER NOT NULL,
                error_kind TEXT,
                error_message TEXT,
                size_bytes INTEGER,
                checksum TEXT,
                started_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )
        .context("create sqlite tables")?;
        Ok(())
    }

    /// Registers a database, replacing any registration with the same id.
    pub async fn insert_config(&self, config: &DatabaseConfig) -> Result<()> {
        let config = config.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open sqlite store")?;
            conn.execute(
                "INSERT OR REPLACE INTO databases (id, name, type, host, port, username, password, db_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    config.id,
                    config.name,
                    config.engine,
                    config.host,
                    config.port,
                    config.username,
                    config.password,
                    config.database
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// Most recent outcomes first.
    pub async fn list_outcomes(&self, limit: usize) -> Result<Vec<JobOutcome>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open sqlite store")?;
            let mut stmt = conn.prepare(
                "SELECT database_id, database_name, name, url, error, error_kind, error_message,
                 size_bytes, checksum, started_at, created_at
                 FROM backups ORDER BY created_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit as i64], row_to_outcome)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
        })
        .await?
    }

    async fn list_configs(&self) -> Result<Vec<DatabaseConfig>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open sqlite store")?;
            let mut stmt = conn.prepare(
                "SELECT id, name, type, host, port, username, password, db_name
                 FROM databases ORDER BY name ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(DatabaseConfig {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    engine: row.get(2)?,
                    host: row.get(3)?,
                    port: row.get(4)?,
                    username: row.get(5)?,
                    password: row.get(6)?,
                    database: row.get(7)?,
                })
            })?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .context("read database registrations")
        })
        .await?
    }

    async fn insert_outcome(&self, outcome: &JobOutcome) -> Result<()> {
        let outcome = outcome.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open sqlite store")?;
            conn.execute(
                "INSERT INTO backups (id, database_id, database_name, name, url, error, error_kind,
                 error_message, size_bytes, checksum, started_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    Uuid::new_v4().to_string(),
                    outcome.database_id,
                    outcome.database_name,
                    outcome.artifact_name,
                    outcome.artifact_path.to_string_lossy(),
                    !outcome.success,
                    outcome.error_kind.map(|k| k.as_str()),
                    outcome.error_message,
                    outcome.size_bytes.map(|s| s as i64),
                    outcome.checksum,
                    outcome.started_at.to_rfc3339(),
                    outcome.finished_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await?
    }
}

#[async_trait::async_trait]
impl ConfigRegistry for SqliteStore {
    async fn list(&self) -> Result<Vec<DatabaseConfig>, PersistenceError> {
        Ok(self.list_configs().await?)
    }
}

#[async_trait::async_trait]
impl ResultSink for SqliteStore {
    async fn record(&self, outcome: &JobOutcome) -> Result<(), PersistenceError> {
        Ok(self.insert_outcome(outcome).await?)
    }
}

fn row_to_outcome(row: &rusqlite::Row) -> rusqlite::Result<JobOutcome> {
    let error: bool = row.get(4)?;
    let error_kind: Option<String> = row.get(5)?;
    let size_bytes: Option<i64> = row.get(7)?;
    Ok(JobOutcome {
        database_id: row.get(0)?,
        database_name: row.get(1)?,
        artifact_name: row.get(2)?,
        artifact_path: PathBuf::from(row.get::<_, String>(3)?),
        success: !error,
        error_kind: error_kind.as_deref().and_then(ErrorKind::parse),
        error_message: row.get(6)?,
        size_bytes: size_bytes.map(|s| s as u64),
        checksum: row.get(8)?,
        started_at: parse_ts(row.get::<_, String>(9)?),
        finished_at: parse_ts(row.get::<_, String>(10)?),
    })
}

fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}
