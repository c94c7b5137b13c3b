//! Backup orchestration: connectivity probes, dump tool invocation and the
//! batch runner that ties them to a result sink.

pub mod dump;
pub mod orchestrator;
pub mod probe;

pub use dump::{DumpEngine, DumpTools, Dumper};
pub use orchestrator::{
    default_files_dir, Orchestrator, OrchestratorOptions, DEFAULT_MAX_CONCURRENT_JOBS,
};
pub use probe::{ConnectionProbe, Prober, TlsMode, DEFAULT_CONNECT_TIMEOUT};
