use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, Utc};
use db_backup_core::{artifact_file_name, file_hash, BackupArtifact, DatabaseConfig, DumpError, Engine};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info};

const MAX_NAME_ATTEMPTS: u32 = 100;

/// Paths of the external dump executables. Bare names are resolved on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpTools {
    pub pg_dump: PathBuf,
    pub mysqldump: PathBuf,
}

impl Default for DumpTools {
    fn default() -> Self {
        Self {
            pg_dump: PathBuf::from("pg_dump"),
            mysqldump: PathBuf::from("mysqldump"),
        }
    }
}

impl DumpTools {
    /// Defaults overridden by `PG_DUMP_PATH` and `MYSQLDUMP_PATH`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            pg_dump: std::env::var_os("PG_DUMP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.pg_dump),
            mysqldump: std::env::var_os("MYSQLDUMP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.mysqldump),
        }
    }

    fn program(&self, engine: Engine) -> &Path {
        match engine {
            Engine::Postgresql => &self.pg_dump,
            Engine::Mysql => &self.mysqldump,
        }
    }
}

/// Produces one backup artifact for one registered database.
#[async_trait::async_trait]
pub trait Dumper: Send + Sync {
    async fn dump(
        &self,
        config: &DatabaseConfig,
        output_dir: &Path,
    ) -> Result<BackupArtifact, DumpError>;
}

/// Runs `pg_dump` / `mysqldump` as child processes and streams their output
/// into a freshly created artifact file.
#[derive(Debug, Clone, Default)]
pub struct DumpEngine {
    tools: DumpTools,
}

impl DumpEngine {
    pub fn new(tools: DumpTools) -> Self {
        Self { tools }
    }

    /// Arguments are passed as a vector and the password only through the
    /// child's environment, so nothing sensitive shows up in the process list.
    fn command(&self, engine: Engine, config: &DatabaseConfig) -> Command {
        let mut cmd = Command::new(self.tools.program(engine));
        match engine {
            Engine::Postgresql => {
                cmd.arg(format!("--host={}", config.host))
                    .arg(format!("--port={}", config.port))
                    .arg(format!("--username={}", config.username))
                    .arg(format!("--dbname={}", config.database))
                    .arg("--format=custom")
                    .arg("--no-password")
                    .env("PGPASSWORD", &config.password);
            }
            Engine::Mysql => {
                cmd.arg(format!("--host={}", config.host))
                    .arg(format!("--port={}", config.port))
                    .arg(format!("--user={}", config.username))
                    .arg(&config.database)
                    .env("MYSQL_PWD", &config.password);
            }
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl Dumper for DumpEngine {
    async fn dump(
        &self,
        config: &DatabaseConfig,
        output_dir: &Path,
    ) -> Result<BackupArtifact, DumpError> {
        let engine = config.engine()?;
        config.validate()?;
        ensure_output_dir(output_dir).await?;

        let (mut file, path, name) = create_artifact_file(
            output_dir,
            &config.name,
            Utc::now(),
            engine.artifact_extension(),
        )
        .await?;
        let partial = PartialArtifact::new(path.clone());

        let program = self.tools.program(engine);
        let tool = program.display().to_string();
        debug!(database_id = %config.id, %engine, %tool, artifact = %name, "starting dump tool");

        let mut child = self
            .command(engine, config)
            .spawn()
            .map_err(|e| tool_failure(&tool, format!("could not start: {e}")))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| DumpError::Internal("dump tool stdout was not captured".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DumpError::Internal("dump tool stderr was not captured".into()))?;

        let mut diagnostics = Vec::new();
        tokio::try_join!(
            async {
                tokio::io::copy(&mut stdout, &mut file).await?;
                file.flush().await?;
                file.sync_all().await
            },
            stderr.read_to_end(&mut diagnostics),
        )
        .map_err(|source| DumpError::FilesystemFailure {
            path: path.clone(),
            source,
        })?;
        drop(file);

        let status = child
            .wait()
            .await
            .map_err(|e| tool_failure(&tool, format!("could not wait for exit: {e}")))?;
        if !status.success() {
            let stderr_text = String::from_utf8_lossy(&diagnostics).trim().to_owned();
            let message = if stderr_text.is_empty() {
                format!("exited with {status}")
            } else {
                stderr_text
            };
            return Err(tool_failure(&tool, message));
        }

        let hash_path = path.clone();
        let (checksum, size_bytes) = tokio::task::spawn_blocking(move || file_hash(&hash_path))
            .await
            .map_err(|e| DumpError::Internal(format!("checksum task failed: {e}")))?
            .map_err(|source| DumpError::FilesystemFailure {
                path: path.clone(),
                source,
            })?;
        partial.keep();

        info!(database_id = %config.id, %engine, artifact = %name, size_bytes, "dump completed");
        Ok(BackupArtifact {
            name,
            path,
            engine,
            size_bytes,
            checksum,
        })
    }
}

/// Creates `dir` and any missing parents. Safe to race with other jobs.
async fn ensure_output_dir(dir: &Path) -> Result<(), DumpError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| DumpError::FilesystemFailure {
            path: dir.to_path_buf(),
            source,
        })
}

async fn create_artifact_file(
    dir: &Path,
    name: &str,
    now: DateTime<Utc>,
    extension: &str,
) -> Result<(File, PathBuf, String), DumpError> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let file_name = artifact_file_name(name, now, extension, attempt);
        let path = dir.join(&file_name);
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((file, path, file_name)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(DumpError::FilesystemFailure { path, source }),
        }
    }
    Err(DumpError::FilesystemFailure {
        path: dir.to_path_buf(),
        source: io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free artifact name for {name:?}"),
        ),
    })
}

fn tool_failure(tool: &str, message: String) -> DumpError {
    DumpError::ToolInvocationFailure {
        tool: tool.to_owned(),
        message,
    }
}

/// Removes the artifact file on drop unless the dump completed.
struct PartialArtifact {
    path: Option<PathBuf>,
}

impl PartialArtifact {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn keep(mut self) {
        self.path = None;
    }
}

impl Drop for PartialArtifact {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "could not remove partial artifact");
            }
        }
    }
}
