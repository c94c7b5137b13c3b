use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::{DatabaseConfig, Engine};
use crate::error::{DumpError, ErrorKind};

/// A dump file written by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupArtifact {
    pub name: String,
    pub path: PathBuf,
    pub engine: Engine,
    pub size_bytes: u64,
    pub checksum: String,
}

/// Result of one dump job. `error_message` and `error_kind` are set iff the job failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobOutcome {
    pub database_id: String,
    pub database_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub artifact_name: String,
    pub artifact_path: PathBuf,
    pub size_bytes: Option<u64>,
    pub checksum: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl JobOutcome {
    pub fn succeeded(
        config: &DatabaseConfig,
        started_at: DateTime<Utc>,
        artifact: &BackupArtifact,
    ) -> Self {
        Self {
            database_id: config.id.clone(),
            database_name: config.name.clone(),
            started_at,
            finished_at: Utc::now(),
            success: true,
            artifact_name: artifact.name.clone(),
            artifact_path: artifact.path.clone(),
            size_bytes: Some(artifact.size_bytes),
            checksum: Some(artifact.checksum.clone()),
            error_kind: None,
            error_message: None,
        }
    }

    pub fn failed(config: &DatabaseConfig, started_at: DateTime<Utc>, error: &DumpError) -> Self {
        Self {
            database_id: config.id.clone(),
            database_name: config.name.clone(),
            started_at,
            finished_at: Utc::now(),
            success: false,
            artifact_name: String::new(),
            artifact_path: PathBuf::new(),
            size_bytes: None,
            checksum: None,
            error_kind: Some(error.kind()),
            error_message: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Outcomes the result sink accepted; lower than `total` when recording failed.
    pub recorded: usize,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[JobOutcome], recorded: usize) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.success).count();
        Self {
            total: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            recorded,
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Summary ===")?;
        writeln!(f, "succeeded: {}", self.succeeded)?;
        writeln!(f, "failed: {}", self.failed)?;
        write!(f, "total: {}", self.total)
    }
}

/// Outcomes of one batch, indexed like the input configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<JobOutcome>,
    pub summary: BatchSummary,
}
