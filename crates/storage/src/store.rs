use db_backup_core::{DatabaseConfig, JobOutcome};
use thiserror::Error;

/// A registry or sink operation failed. Wraps the backend's own error chain.
#[derive(Debug, Error)]
#[error("persistence failure: {0:#}")]
pub struct PersistenceError(#[from] anyhow::Error);

/// Source of the database registrations a batch runs over.
#[async_trait::async_trait]
pub trait ConfigRegistry: Send + Sync {
    /// All registered databases, ordered by name.
    async fn list(&self) -> Result<Vec<DatabaseConfig>, PersistenceError>;
}

/// Durable record of job outcomes.
#[async_trait::async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist one outcome. Called exactly once per job.
    async fn record(&self, outcome: &JobOutcome) -> Result<(), PersistenceError>;
}
