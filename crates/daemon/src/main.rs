use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use db_backup_daemon::config::{self, Config, Settings};
use db_backup_daemon::store::Store;
use db_backup_daemon::{
    build_orchestrator, build_probe, describe_outcome, probe_databases, run_batch, ProbeTarget,
};
use db_backup_engine::Orchestrator;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (cfg, mode, rest) = parse_args()?;
    let settings = Settings::from_env(&cfg)?;
    let store = Arc::new(Store::open(&settings).await?);

    match mode.as_deref() {
        None | Some("run-once") => run_once(store, &settings).await,
        Some("probe") => probe(store, &settings, &rest).await,
        Some("history") => history(store, &rest).await,
        Some("service") => run_service(store, &settings).await,
        Some(other) => bail!("unknown mode: {other}"),
    }
}

/// Parse CLI args, returning the loaded config, the mode and its arguments.
fn parse_args() -> Result<(Config, Option<String>, Vec<String>)> {
    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut mode: Option<String> = None;
    let mut rest = Vec::new();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() {
                    bail!("--config requires a path argument");
                }
                config_path = Some(PathBuf::from(&args[i]));
            }
            other if mode.is_none() => {
                mode = Some(other.to_owned());
            }
            other => rest.push(other.to_owned()),
        }
        i += 1;
    }

    let cfg = match config_path {
        Some(path) => {
            info!(?path, "loading config file");
            config::load_config(&path)?
        }
        None => Config::default(),
    };

    Ok((cfg, mode, rest))
}

async fn run_once(store: Arc<Store>, settings: &Settings) -> Result<ExitCode> {
    let report = db_backup_daemon::run_once(store, settings).await?;

    for outcome in &report.outcomes {
        println!("{}", describe_outcome(outcome));
    }
    println!("{}", report.summary);
    Ok(ExitCode::SUCCESS)
}

async fn probe(store: Arc<Store>, settings: &Settings, args: &[String]) -> Result<ExitCode> {
    let target = match args.first().map(String::as_str) {
        Some("--all") => ProbeTarget::All,
        Some(id) => ProbeTarget::Id(id.to_owned()),
        None => bail!("probe requires a database id or --all"),
    };

    let prober = build_probe(settings);
    let results = probe_databases(store.as_ref(), &prober, target).await?;

    let mut healthy = true;
    for (config, result) in &results {
        match result {
            Ok(()) => println!("✓ {}: reachable", config.name),
            Err(e) => {
                healthy = false;
                println!("✗ {}: {e}", config.name);
            }
        }
    }
    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn history(store: Arc<Store>, args: &[String]) -> Result<ExitCode> {
    let limit = match args.first() {
        Some(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("invalid history limit: {raw}"))?,
        None => 20,
    };

    for outcome in store.list_outcomes(limit).await? {
        println!("{}", serde_json::to_string(&outcome)?);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_service(store: Arc<Store>, settings: &Settings) -> Result<ExitCode> {
    let orchestrator = build_orchestrator(settings, store.clone());

    info!(interval = ?settings.interval, "starting backup service");
    scheduler_loop(store, orchestrator, settings.interval).await;
    Ok(ExitCode::SUCCESS)
}

async fn scheduler_loop(store: Arc<Store>, orchestrator: Orchestrator, interval: std::time::Duration) {
    loop {
        match run_batch(store.as_ref(), &orchestrator).await {
            Ok(report) => {
                if report.summary.failed > 0 {
                    warn!(
                        failed = report.summary.failed,
                        total = report.summary.total,
                        "scheduled batch finished with failures"
                    );
                } else {
                    info!(total = report.summary.total, "scheduled batch finished");
                }
            }
            Err(e) => error!(error = %format!("{e:#}"), "scheduled batch could not start"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                return;
            }
        }
    }
}
