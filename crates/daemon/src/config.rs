use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use db_backup_engine::{
    default_files_dir, DumpTools, OrchestratorOptions, TlsMode, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_MAX_CONCURRENT_JOBS,
};
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub backup: BackupConfig,
    pub tools: ToolsConfig,
    pub probe: ProbeConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: Option<String>,
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct BackupConfig {
    pub files_dir: Option<String>,
    pub max_concurrent_jobs: Option<usize>,
    pub probe_before_dump: Option<bool>,
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ToolsConfig {
    pub pg_dump: Option<String>,
    pub mysqldump: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ProbeConfig {
    pub connect_timeout_ms: Option<u64>,
    pub tls_mode: Option<TlsMode>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_hours: Option<u64>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}

/// Effective settings: environment first, then the config file, then defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub sqlite_path: PathBuf,
    pub orchestrator: OrchestratorOptions,
    pub tools: DumpTools,
    pub connect_timeout: Duration,
    pub tls_mode: TlsMode,
    pub interval: Duration,
}

impl Settings {
    pub fn from_env(cfg: &Config) -> Result<Self> {
        Self::resolve(cfg, |key| std::env::var(key).ok())
    }

    pub fn resolve(cfg: &Config, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = env("DATABASE_URL").or_else(|| cfg.storage.database_url.clone());
        let sqlite_path = env("DB_BACKUP_SQLITE_PATH")
            .or_else(|| cfg.storage.sqlite_path.clone())
            .unwrap_or_else(|| "./db-backup.sqlite3".to_owned());

        let files_dir = env("FILES_DIR")
            .or_else(|| cfg.backup.files_dir.clone())
            .map(PathBuf::from)
            .unwrap_or_else(default_files_dir);
        let max_concurrent_jobs = parse_env(&env, "DB_BACKUP_MAX_JOBS")?
            .or(cfg.backup.max_concurrent_jobs)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS);
        let deadline = parse_env(&env, "DB_BACKUP_DEADLINE_SECS")?
            .or(cfg.backup.deadline_secs)
            .map(Duration::from_secs);

        let defaults = DumpTools::default();
        let tools = DumpTools {
            pg_dump: env("PG_DUMP_PATH")
                .or_else(|| cfg.tools.pg_dump.clone())
                .map(PathBuf::from)
                .unwrap_or(defaults.pg_dump),
            mysqldump: env("MYSQLDUMP_PATH")
                .or_else(|| cfg.tools.mysqldump.clone())
                .map(PathBuf::from)
                .unwrap_or(defaults.mysqldump),
        };

        let tls_mode = match env("DB_BACKUP_TLS_MODE") {
            Some(raw) => raw
                .parse()
                .map_err(|e| anyhow!("DB_BACKUP_TLS_MODE: {e}"))?,
            None => cfg.probe.tls_mode.unwrap_or_default(),
        };

        Ok(Self {
            database_url,
            sqlite_path: PathBuf::from(sqlite_path),
            orchestrator: OrchestratorOptions {
                files_dir,
                max_concurrent_jobs,
                probe_before_dump: cfg.backup.probe_before_dump.unwrap_or(false),
                deadline,
            },
            tools,
            connect_timeout: cfg
                .probe
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            tls_mode,
            interval: Duration::from_secs(cfg.schedule.interval_hours.unwrap_or(24).max(1) * 3600),
        })
    }
}

fn parse_env<T>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env(key)
        .map(|raw| raw.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("invalid value for {key}"))
}
