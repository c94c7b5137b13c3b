use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use db_backup_core::{BackupArtifact, BatchReport, BatchSummary, DatabaseConfig, DumpError, JobOutcome};
use db_backup_storage::ResultSink;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::dump::Dumper;
use crate::probe::Prober;

pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Directory every artifact of the batch is written to.
    pub files_dir: PathBuf,
    /// Upper bound on dump jobs running at once. Zero is treated as one.
    pub max_concurrent_jobs: usize,
    /// Probe each database before dumping it; a failed probe fails the job.
    pub probe_before_dump: bool,
    /// Overall budget for the batch, measured from the start of `run_all`.
    pub deadline: Option<Duration>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            files_dir: default_files_dir(),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            probe_before_dump: false,
            deadline: None,
        }
    }
}

/// `<working-dir>/files`
pub fn default_files_dir() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("files")
}

/// Runs one dump job per registered database and records every outcome.
#[derive(Clone)]
pub struct Orchestrator {
    dumper: Arc<dyn Dumper>,
    prober: Option<Arc<dyn Prober>>,
    sink: Arc<dyn ResultSink>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        dumper: Arc<dyn Dumper>,
        sink: Arc<dyn ResultSink>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            dumper,
            prober: None,
            sink,
            options,
        }
    }

    /// Prober used when `probe_before_dump` is set.
    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Settles every job, successful or not, and returns one outcome per
    /// config in input order. Never fails as a whole.
    pub async fn run_all(&self, configs: Vec<DatabaseConfig>) -> BatchReport {
        if configs.is_empty() {
            info!("no databases registered, nothing to back up");
            return BatchReport::default();
        }

        let max_concurrent_jobs = self.options.max_concurrent_jobs.max(1);
        let semaphore = Arc::new(Semaphore::new(max_concurrent_jobs));
        let deadline = self
            .options
            .deadline
            .map(|budget| (Instant::now() + budget, budget));
        info!(
            total = configs.len(),
            max_concurrent_jobs,
            files_dir = %self.options.files_dir.display(),
            "starting backup batch"
        );

        let handles: Vec<_> = configs
            .iter()
            .cloned()
            .map(|config| {
                let job = Job {
                    dumper: self.dumper.clone(),
                    prober: self
                        .options
                        .probe_before_dump
                        .then(|| self.prober.clone())
                        .flatten(),
                    sink: self.sink.clone(),
                    files_dir: self.options.files_dir.clone(),
                    semaphore: semaphore.clone(),
                };
                tokio::spawn(job.run(config, deadline))
            })
            .collect();

        let mut outcomes = Vec::with_capacity(configs.len());
        let mut recorded = 0;
        for (config, joined) in configs.iter().zip(join_all(handles).await) {
            let (outcome, was_recorded) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(database_id = %config.id, error = %e, "backup job aborted");
                    let err = DumpError::Internal(format!("backup job aborted: {e}"));
                    let outcome = JobOutcome::failed(config, Utc::now(), &err);
                    let was_recorded = record(self.sink.as_ref(), &outcome).await;
                    (outcome, was_recorded)
                }
            };
            recorded += usize::from(was_recorded);
            outcomes.push(outcome);
        }

        let summary = BatchSummary::from_outcomes(&outcomes, recorded);
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            recorded = summary.recorded,
            "backup batch finished"
        );
        BatchReport { outcomes, summary }
    }
}

struct Job {
    dumper: Arc<dyn Dumper>,
    prober: Option<Arc<dyn Prober>>,
    sink: Arc<dyn ResultSink>,
    files_dir: PathBuf,
    semaphore: Arc<Semaphore>,
}

impl Job {
    async fn run(
        self,
        config: DatabaseConfig,
        deadline: Option<(Instant, Duration)>,
    ) -> (JobOutcome, bool) {
        let queued_at = Utc::now();
        let outcome = match deadline {
            Some((at, budget)) => match tokio::time::timeout_at(at, self.attempt(&config)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let err = DumpError::DeadlineExceeded(budget);
                    warn!(database_id = %config.id, database = %config.name, error = %err, "backup job cancelled");
                    JobOutcome::failed(&config, queued_at, &err)
                }
            },
            None => self.attempt(&config).await,
        };
        let was_recorded = record(self.sink.as_ref(), &outcome).await;
        (outcome, was_recorded)
    }

    async fn attempt(&self, config: &DatabaseConfig) -> JobOutcome {
        let Ok(_permit) = self.semaphore.acquire().await else {
            let err = DumpError::Internal("job pool closed".into());
            return JobOutcome::failed(config, Utc::now(), &err);
        };
        let started_at = Utc::now();
        info!(database_id = %config.id, database = %config.name, engine = %config.engine, "backup job started");

        match self.probe_and_dump(config).await {
            Ok(artifact) => {
                info!(database_id = %config.id, artifact = %artifact.name, "backup job succeeded");
                JobOutcome::succeeded(config, started_at, &artifact)
            }
            Err(e) => {
                warn!(database_id = %config.id, database = %config.name, error = %e, "backup job failed");
                JobOutcome::failed(config, started_at, &e)
            }
        }
    }

    async fn probe_and_dump(&self, config: &DatabaseConfig) -> Result<BackupArtifact, DumpError> {
        if let Some(prober) = &self.prober {
            prober.probe(config).await?;
        }
        self.dumper.dump(config, &self.files_dir).await
    }
}

/// Sink failures never fail the job they belong to.
async fn record(sink: &dyn ResultSink, outcome: &JobOutcome) -> bool {
    match sink.record(outcome).await {
        Ok(()) => true,
        Err(e) => {
            error!(database_id = %outcome.database_id, error = %e, "failed to record backup outcome");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use db_backup_core::{ConnectionError, Engine, ErrorKind};
    use db_backup_storage::PersistenceError;

    use crate::dump::{DumpEngine, DumpTools};

    fn config(name: &str) -> DatabaseConfig {
        DatabaseConfig {
            id: format!("id-{name}"),
            name: name.into(),
            engine: "postgresql".into(),
            host: "db1".into(),
            port: 5432,
            username: "u".into(),
            password: "p".into(),
            database: name.into(),
        }
    }

    #[derive(Default)]
    struct FakeDumper {
        delays: HashMap<String, Duration>,
        failing: HashSet<String>,
        panicking: HashSet<String>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeDumper {
        fn delay(mut self, name: &str, delay: Duration) -> Self {
            self.delays.insert(name.into(), delay);
            self
        }

        fn fail(mut self, name: &str) -> Self {
            self.failing.insert(name.into());
            self
        }

        fn panic_on(mut self, name: &str) -> Self {
            self.panicking.insert(name.into());
            self
        }
    }

    #[async_trait::async_trait]
    impl Dumper for FakeDumper {
        async fn dump(
            &self,
            config: &DatabaseConfig,
            output_dir: &Path,
        ) -> Result<BackupArtifact, DumpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(&config.name) {
                tokio::time::sleep(*delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panicking.contains(&config.name) {
                panic!("dumper blew up on {}", config.name);
            }
            if self.failing.contains(&config.name) {
                return Err(DumpError::ToolInvocationFailure {
                    tool: "pg_dump".into(),
                    message: format!("could not connect to server at {}", config.host),
                });
            }
            let name = format!("{}.dump", config.name);
            Ok(BackupArtifact {
                path: output_dir.join(&name),
                name,
                engine: Engine::Postgresql,
                size_bytes: 1,
                checksum: "00".into(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        recorded: Mutex<Vec<JobOutcome>>,
        fail_for: Option<String>,
    }

    impl RecordingSink {
        fn failing_for(database_id: &str) -> Self {
            Self {
                fail_for: Some(database_id.into()),
                ..Self::default()
            }
        }

        fn ids(&self) -> Vec<String> {
            self.recorded
                .lock()
                .unwrap()
                .iter()
                .map(|o| o.database_id.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl ResultSink for RecordingSink {
        async fn record(&self, outcome: &JobOutcome) -> Result<(), PersistenceError> {
            if self.fail_for.as_deref() == Some(outcome.database_id.as_str()) {
                return Err(anyhow::anyhow!("connection to metadata store lost").into());
            }
            self.recorded.lock().unwrap().push(outcome.clone());
            Ok(())
        }
    }

    struct UnreachableProber;

    #[async_trait::async_trait]
    impl Prober for UnreachableProber {
        async fn probe(&self, config: &DatabaseConfig) -> Result<(), ConnectionError> {
            Err(ConnectionError::NetworkUnreachable(format!(
                "{}:{} refused the connection",
                config.host, config.port
            )))
        }
    }

    fn options(max_concurrent_jobs: usize) -> OrchestratorOptions {
        OrchestratorOptions {
            files_dir: PathBuf::from("/var/backups/files"),
            max_concurrent_jobs,
            probe_before_dump: false,
            deadline: None,
        }
    }

    fn ids(report: &BatchReport) -> Vec<String> {
        report.outcomes.iter().map(|o| o.database_id.clone()).collect()
    }

    #[tokio::test]
    async fn empty_batch_returns_immediately() {
        let dumper = Arc::new(FakeDumper::default());
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Orchestrator::new(dumper.clone(), sink.clone(), options(4));

        let report = orchestrator.run_all(Vec::new()).await;

        assert!(report.outcomes.is_empty());
        assert_eq!(report.summary, BatchSummary::default());
        assert_eq!(dumper.calls.load(Ordering::SeqCst), 0);
        assert!(sink.ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn outcomes_follow_input_order_not_completion_order() {
        let dumper = Arc::new(
            FakeDumper::default()
                .delay("a", Duration::from_millis(30))
                .delay("b", Duration::from_millis(20))
                .delay("c", Duration::from_millis(10)),
        );
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Orchestrator::new(dumper, sink.clone(), options(4));

        let report = orchestrator
            .run_all(vec![config("a"), config("b"), config("c")])
            .await;

        assert_eq!(ids(&report), ["id-a", "id-b", "id-c"]);
        assert_eq!(sink.ids(), ["id-c", "id-b", "id-a"]);
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.succeeded, 3);
    }

    #[tokio::test]
    async fn failing_job_does_not_affect_siblings() {
        let dumper = Arc::new(FakeDumper::default().fail("b"));
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Orchestrator::new(dumper, sink.clone(), options(4));

        let report = orchestrator
            .run_all(vec![config("a"), config("b"), config("c")])
            .await;

        let success: Vec<_> = report.outcomes.iter().map(|o| o.success).collect();
        assert_eq!(success, [true, false, true]);
        let failed = &report.outcomes[1];
        assert_eq!(failed.error_kind, Some(ErrorKind::ToolInvocationFailure));
        assert!(failed.error_message.as_deref().unwrap().contains("could not connect"));
        assert!(failed.artifact_name.is_empty());
        assert_eq!(report.outcomes[0].artifact_name, "a.dump");

        assert_eq!(sink.ids().len(), 3);
        assert_eq!(
            report.summary,
            BatchSummary {
                total: 3,
                succeeded: 2,
                failed: 1,
                recorded: 3
            }
        );
    }

    #[tokio::test]
    async fn panicking_job_becomes_recorded_internal_failure() {
        let dumper = Arc::new(FakeDumper::default().panic_on("b"));
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Orchestrator::new(dumper, sink.clone(), options(4));

        let report = orchestrator
            .run_all(vec![config("a"), config("b"), config("c")])
            .await;

        let success: Vec<_> = report.outcomes.iter().map(|o| o.success).collect();
        assert_eq!(success, [true, false, true]);
        let aborted = &report.outcomes[1];
        assert_eq!(aborted.database_id, "id-b");
        assert_eq!(aborted.error_kind, Some(ErrorKind::Internal));
        assert!(aborted.error_message.as_deref().unwrap().contains("aborted"));

        let mut recorded = sink.ids();
        recorded.sort();
        assert_eq!(recorded, ["id-a", "id-b", "id-c"]);
        assert_eq!(report.summary.recorded, 3);
        assert_eq!(report.summary.failed, 1);
    }

    #[tokio::test]
    async fn sink_failure_does_not_fail_the_dump() {
        let dumper = Arc::new(FakeDumper::default());
        let sink = Arc::new(RecordingSink::failing_for("id-b"));
        let orchestrator = Orchestrator::new(dumper, sink.clone(), options(4));

        let report = orchestrator
            .run_all(vec![config("a"), config("b"), config("c")])
            .await;

        assert_eq!(report.outcomes.len(), 3);
        assert!(report.outcomes.iter().all(|o| o.success));
        assert_eq!(report.summary.succeeded, 3);
        assert_eq!(report.summary.recorded, 2);
        let mut recorded = sink.ids();
        recorded.sort();
        assert_eq!(recorded, ["id-a", "id-c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_jobs_are_capped() {
        let names: Vec<String> = (0..8).map(|i| format!("db{i}")).collect();
        let dumper = names.iter().fold(FakeDumper::default(), |d, n| {
            d.delay(n, Duration::from_millis(10))
        });
        let dumper = Arc::new(dumper);
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Orchestrator::new(dumper.clone(), sink, options(3));

        let report = orchestrator
            .run_all(names.iter().map(|n| config(n)).collect())
            .await;

        assert_eq!(report.summary.succeeded, 8);
        assert_eq!(dumper.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_cap_still_runs_jobs_one_at_a_time() {
        let dumper = Arc::new(
            FakeDumper::default()
                .delay("a", Duration::from_millis(10))
                .delay("b", Duration::from_millis(10)),
        );
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Orchestrator::new(dumper.clone(), sink, options(0));

        let report = orchestrator.run_all(vec![config("a"), config("b")]).await;

        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(dumper.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fails_only_unfinished_jobs() {
        let dumper = Arc::new(
            FakeDumper::default()
                .delay("fast", Duration::from_millis(10))
                .delay("slow", Duration::from_secs(600)),
        );
        let sink = Arc::new(RecordingSink::default());
        let mut opts = options(4);
        opts.deadline = Some(Duration::from_secs(60));
        let orchestrator = Orchestrator::new(dumper, sink.clone(), opts);

        let report = orchestrator
            .run_all(vec![config("slow"), config("fast")])
            .await;

        assert!(!report.outcomes[0].success);
        assert_eq!(
            report.outcomes[0].error_kind,
            Some(ErrorKind::DeadlineExceeded)
        );
        assert!(report.outcomes[1].success);
        assert_eq!(report.summary.recorded, 2);
    }

    #[tokio::test]
    async fn failed_probe_skips_the_dump() {
        let dumper = Arc::new(FakeDumper::default());
        let sink = Arc::new(RecordingSink::default());
        let mut opts = options(4);
        opts.probe_before_dump = true;
        let orchestrator =
            Orchestrator::new(dumper.clone(), sink, opts).with_prober(Arc::new(UnreachableProber));

        let report = orchestrator.run_all(vec![config("a")]).await;

        assert_eq!(dumper.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            report.outcomes[0].error_kind,
            Some(ErrorKind::NetworkUnreachable)
        );
    }

    #[tokio::test]
    async fn prober_is_ignored_unless_enabled() {
        let dumper = Arc::new(FakeDumper::default());
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Orchestrator::new(dumper.clone(), sink, options(4))
            .with_prober(Arc::new(UnreachableProber));

        let report = orchestrator.run_all(vec![config("a")]).await;

        assert!(report.outcomes[0].success);
        assert_eq!(dumper.calls.load(Ordering::SeqCst), 1);
    }

    fn real_engine(pg_dump: &str) -> Arc<DumpEngine> {
        Arc::new(DumpEngine::new(DumpTools {
            pg_dump: PathBuf::from(pg_dump),
            mysqldump: PathBuf::from("false"),
        }))
    }

    #[tokio::test]
    async fn postgres_job_produces_named_artifact_and_success_outcome() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let sink = Arc::new(RecordingSink::default());
        let mut opts = options(4);
        opts.files_dir = tmp.path().join("files");
        let orchestrator = Orchestrator::new(real_engine("echo"), sink.clone(), opts);

        let orders = DatabaseConfig {
            id: "1".into(),
            name: "orders".into(),
            engine: "postgresql".into(),
            host: "db1".into(),
            port: 5432,
            username: "u".into(),
            password: "p".into(),
            database: "orders".into(),
        };
        let report = orchestrator.run_all(vec![orders]).await;

        let outcome = &report.outcomes[0];
        assert!(outcome.success, "{outcome:?}");
        assert!(outcome.artifact_name.starts_with("orders-"));
        assert!(outcome.artifact_name.ends_with(".dump"));
        assert!(outcome.artifact_path.is_file());
        assert_eq!(outcome.error_message, None);
        assert_eq!(sink.ids(), ["1"]);
    }

    #[tokio::test]
    async fn unsupported_engine_becomes_failed_outcome() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let sink = Arc::new(RecordingSink::default());
        let mut opts = options(4);
        opts.files_dir = tmp.path().join("files");
        let orchestrator =
            Orchestrator::new(real_engine("/nonexistent/pg_dump"), sink, opts);

        let mut legacy = config("legacy");
        legacy.engine = "oracle".into();
        let report = orchestrator.run_all(vec![legacy]).await;

        let outcome = &report.outcomes[0];
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::UnsupportedEngine));
        assert!(outcome.error_message.as_deref().unwrap().contains("Unsupported"));
    }

    #[tokio::test]
    async fn uncreatable_files_dir_fails_every_job() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let sink = Arc::new(RecordingSink::default());
        let mut opts = options(4);
        opts.files_dir = blocker.join("files");
        let orchestrator = Orchestrator::new(real_engine("echo"), sink.clone(), opts);

        let report = orchestrator
            .run_all(vec![config("a"), config("b"), config("c")])
            .await;

        assert!(report
            .outcomes
            .iter()
            .all(|o| o.error_kind == Some(ErrorKind::FilesystemFailure)));
        assert_eq!(report.summary.failed, report.summary.total);
        assert_eq!(sink.ids().len(), 3);
    }
}
