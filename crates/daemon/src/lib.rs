pub mod config;
pub mod store;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use db_backup_core::{BatchReport, ConnectionError, DatabaseConfig, JobOutcome};
use db_backup_engine::{ConnectionProbe, DumpEngine, Orchestrator, Prober};
use db_backup_storage::{ConfigRegistry, ResultSink};
use tracing::info;

use crate::config::Settings;

pub fn build_probe(settings: &Settings) -> ConnectionProbe {
    ConnectionProbe::new(settings.connect_timeout, settings.tls_mode)
}

pub fn build_orchestrator(settings: &Settings, sink: Arc<dyn ResultSink>) -> Orchestrator {
    let engine = Arc::new(DumpEngine::new(settings.tools.clone()));
    Orchestrator::new(engine, sink, settings.orchestrator.clone())
        .with_prober(Arc::new(build_probe(settings)))
}

/// One batch over everything in the registry. Fails only when the registry
/// cannot be read; individual job failures are part of the report.
pub async fn run_batch(
    registry: &dyn ConfigRegistry,
    orchestrator: &Orchestrator,
) -> Result<BatchReport> {
    let configs = registry
        .list()
        .await
        .context("list registered databases")?;
    info!(count = configs.len(), "loaded database registrations");
    Ok(orchestrator.run_all(configs).await)
}

/// A single `run-once` batch against a store that is both registry and sink.
/// A missing or unwritable backup directory fails each job, not the batch.
pub async fn run_once<S>(store: Arc<S>, settings: &Settings) -> Result<BatchReport>
where
    S: ConfigRegistry + ResultSink + 'static,
{
    let orchestrator = build_orchestrator(settings, store.clone());
    run_batch(store.as_ref(), &orchestrator).await
}

pub enum ProbeTarget {
    All,
    Id(String),
}

pub async fn probe_databases(
    registry: &dyn ConfigRegistry,
    prober: &dyn Prober,
    target: ProbeTarget,
) -> Result<Vec<(DatabaseConfig, Result<(), ConnectionError>)>> {
    let mut configs = registry
        .list()
        .await
        .context("list registered databases")?;
    if let ProbeTarget::Id(id) = target {
        configs.retain(|c| c.id == id);
        if configs.is_empty() {
            bail!("database not found: {id}");
        }
    }

    let mut results = Vec::with_capacity(configs.len());
    for config in configs {
        let result = prober.probe(&config).await;
        results.push((config, result));
    }
    Ok(results)
}

/// One line per job, derived from the outcome.
pub fn describe_outcome(outcome: &JobOutcome) -> String {
    if outcome.success {
        format!(
            "✓ {}: {}",
            outcome.database_name,
            outcome.artifact_path.display()
        )
    } else {
        format!(
            "✗ {}: {}",
            outcome.database_name,
            outcome.error_message.as_deref().unwrap_or("unknown error")
        )
    }
}
