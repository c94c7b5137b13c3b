use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unsupported database engine: {0:?}")]
pub struct UnsupportedEngine(pub String);

/// Failure of a single connectivity probe.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),
    #[error(transparent)]
    UnsupportedEngine(#[from] UnsupportedEngine),
    #[error("connection failed: {0}")]
    Other(String),
}

/// Failure of a single dump job.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error(transparent)]
    UnsupportedEngine(#[from] UnsupportedEngine),
    #[error("invalid {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
    #[error("filesystem failure at {}: {source}", path.display())]
    FilesystemFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} failed: {message}")]
    ToolInvocationFailure { tool: String, message: String },
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("batch deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Machine-readable classification stored alongside a failed outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedEngine,
    InvalidConfig,
    ConnectionTimeout,
    AuthenticationFailure,
    NetworkUnreachable,
    ConnectionFailure,
    FilesystemFailure,
    ToolInvocationFailure,
    DeadlineExceeded,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedEngine => "unsupported_engine",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::ConnectionTimeout => "connection_timeout",
            ErrorKind::AuthenticationFailure => "authentication_failure",
            ErrorKind::NetworkUnreachable => "network_unreachable",
            ErrorKind::ConnectionFailure => "connection_failure",
            ErrorKind::FilesystemFailure => "filesystem_failure",
            ErrorKind::ToolInvocationFailure => "tool_invocation_failure",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let kind = match raw {
            "unsupported_engine" => ErrorKind::UnsupportedEngine,
            "invalid_config" => ErrorKind::InvalidConfig,
            "connection_timeout" => ErrorKind::ConnectionTimeout,
            "authentication_failure" => ErrorKind::AuthenticationFailure,
            "network_unreachable" => ErrorKind::NetworkUnreachable,
            "connection_failure" => ErrorKind::ConnectionFailure,
            "filesystem_failure" => ErrorKind::FilesystemFailure,
            "tool_invocation_failure" => ErrorKind::ToolInvocationFailure,
            "deadline_exceeded" => ErrorKind::DeadlineExceeded,
            "internal" => ErrorKind::Internal,
            _ => return None,
        };
        Some(kind)
    }
}

impl ConnectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::Timeout(_) => ErrorKind::ConnectionTimeout,
            ConnectionError::AuthenticationFailure(_) => ErrorKind::AuthenticationFailure,
            ConnectionError::NetworkUnreachable(_) => ErrorKind::NetworkUnreachable,
            ConnectionError::UnsupportedEngine(_) => ErrorKind::UnsupportedEngine,
            ConnectionError::Other(_) => ErrorKind::ConnectionFailure,
        }
    }
}

impl DumpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DumpError::UnsupportedEngine(_) => ErrorKind::UnsupportedEngine,
            DumpError::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            DumpError::FilesystemFailure { .. } => ErrorKind::FilesystemFailure,
            DumpError::ToolInvocationFailure { .. } => ErrorKind::ToolInvocationFailure,
            DumpError::Connection(e) => e.kind(),
            DumpError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            DumpError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        DumpError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}
