pub mod backup;
pub mod database;
pub mod error;
pub mod hash;
pub mod naming;

pub use backup::{BackupArtifact, BatchReport, BatchSummary, JobOutcome};
pub use database::{DatabaseConfig, Engine};
pub use error::{ConnectionError, DumpError, ErrorKind, UnsupportedEngine};
pub use hash::file_hash;
pub use naming::{artifact_file_name, format_artifact_timestamp, sanitize_name};
