use anyhow::Result;
use db_backup_core::{DatabaseConfig, JobOutcome};
use db_backup_storage::{ConfigRegistry, PersistenceError, PostgresStore, ResultSink, SqliteStore};
use tracing::info;

use crate::config::Settings;

/// The dashboard's metadata database, acting as both registry and result sink.
pub enum Store {
    Sqlite(SqliteStore),
    Postgres(PostgresStore),
}

impl Store {
    /// Postgres when a database URL is configured, SQLite otherwise.
    pub async fn open(settings: &Settings) -> Result<Self> {
        match &settings.database_url {
            Some(url) => {
                info!("using postgres metadata store");
                Ok(Store::Postgres(PostgresStore::new(url).await?))
            }
            None => {
                info!(path = %settings.sqlite_path.display(), "using sqlite metadata store");
                Ok(Store::Sqlite(SqliteStore::new(settings.sqlite_path.clone())?))
            }
        }
    }

    pub async fn list_outcomes(&self, limit: usize) -> Result<Vec<JobOutcome>> {
        match self {
            Store::Sqlite(s) => s.list_outcomes(limit).await,
            Store::Postgres(s) => s.list_outcomes(limit).await,
        }
    }
}

#[async_trait::async_trait]
impl ConfigRegistry for Store {
    async fn list(&self) -> Result<Vec<DatabaseConfig>, PersistenceError> {
        match self {
            Store::Sqlite(s) => s.list().await,
            Store::Postgres(s) => s.list().await,
        }
    }
}

#[async_trait::async_trait]
impl ResultSink for Store {
    async fn record(&self, outcome: &JobOutcome) -> Result<(), PersistenceError> {
        match self {
            Store::Sqlite(s) => s.record(outcome).await,
            Store::Postgres(s) => s.record(outcome).await,
        }
    }
}
