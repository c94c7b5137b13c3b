use std::future::Future;
use std::io;
use std::str::FromStr;
use std::time::Duration;

use db_backup_core::{ConnectionError, DatabaseConfig, Engine};
use serde::Deserialize;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{ConnectOptions, Connection};
use tokio::time::timeout;
use tracing::{debug, warn};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// TLS policy for probe connections.
///
/// `Prefer` and `Require` encrypt without validating the server certificate
/// chain, which lets self-signed deployments through. Use `VerifyFull` when the
/// chain and host name must be checked.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyFull,
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(TlsMode::Disable),
            "prefer" => Ok(TlsMode::Prefer),
            "require" => Ok(TlsMode::Require),
            "verify-full" => Ok(TlsMode::VerifyFull),
            other => Err(format!("unknown tls mode: {other}")),
        }
    }
}

impl TlsMode {
    fn postgres(self) -> PgSslMode {
        match self {
            TlsMode::Disable => PgSslMode::Disable,
            TlsMode::Prefer => PgSslMode::Prefer,
            TlsMode::Require => PgSslMode::Require,
            TlsMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }

    fn mysql(self) -> MySqlSslMode {
        match self {
            TlsMode::Disable => MySqlSslMode::Disabled,
            TlsMode::Prefer => MySqlSslMode::Preferred,
            TlsMode::Require => MySqlSslMode::Required,
            TlsMode::VerifyFull => MySqlSslMode::VerifyIdentity,
        }
    }
}

/// Checks that a registered database accepts connections and answers queries.
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    /// Never retries; a single failed attempt is reported as-is.
    async fn probe(&self, config: &DatabaseConfig) -> Result<(), ConnectionError>;
}

/// Opens one transient connection over the engine's wire protocol, issues a
/// trivial round-trip and closes it again.
#[derive(Debug, Clone)]
pub struct ConnectionProbe {
    connect_timeout: Duration,
    tls_mode: TlsMode,
}

impl Default for ConnectionProbe {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, TlsMode::default())
    }
}

impl ConnectionProbe {
    pub fn new(connect_timeout: Duration, tls_mode: TlsMode) -> Self {
        Self {
            connect_timeout,
            tls_mode,
        }
    }

    async fn probe_postgres(&self, config: &DatabaseConfig) -> Result<(), sqlx::Error> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(self.tls_mode.postgres())
            .disable_statement_logging();

        let mut conn = PgConnection::connect_with(&options).await?;
        let round_trip = sqlx::query("SELECT 1").execute(&mut conn).await.map(|_| ());
        let closed = conn.close().await;
        round_trip.and(closed)
    }

    async fn probe_mysql(&self, config: &DatabaseConfig) -> Result<(), sqlx::Error> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(self.tls_mode.mysql())
            .disable_statement_logging();

        let mut conn = MySqlConnection::connect_with(&options).await?;
        let round_trip = conn.ping().await;
        let closed = conn.close().await;
        round_trip.and(closed)
    }

    /// Connect, round-trip and close all share the one `connect_timeout` budget.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, sqlx::Error>>,
    ) -> Result<T, ConnectionError> {
        match timeout(self.connect_timeout, fut).await {
            Ok(result) => result.map_err(|e| self.classify(e)),
            Err(_) => Err(ConnectionError::Timeout(self.connect_timeout)),
        }
    }

    fn classify(&self, err: sqlx::Error) -> ConnectionError {
        match err {
            // SQLSTATE class 28 is "invalid authorization specification" on both engines.
            sqlx::Error::Database(db) if db.code().is_some_and(|c| c.starts_with("28")) => {
                ConnectionError::AuthenticationFailure(db.message().to_owned())
            }
            sqlx::Error::Io(io) => self.classify_io(io),
            sqlx::Error::PoolTimedOut => ConnectionError::Timeout(self.connect_timeout),
            other => ConnectionError::Other(other.to_string()),
        }
    }

    fn classify_io(&self, err: io::Error) -> ConnectionError {
        match err.kind() {
            io::ErrorKind::TimedOut => ConnectionError::Timeout(self.connect_timeout),
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::NotConnected => ConnectionError::NetworkUnreachable(err.to_string()),
            _ => {
                let message = err.to_string();
                let lowered = message.to_ascii_lowercase();
                if lowered.contains("unreachable")
                    || lowered.contains("lookup")
                    || lowered.contains("resolve")
                {
                    ConnectionError::NetworkUnreachable(message)
                } else {
                    ConnectionError::Other(message)
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Prober for ConnectionProbe {
    async fn probe(&self, config: &DatabaseConfig) -> Result<(), ConnectionError> {
        let engine = config.engine()?;
        debug!(database_id = %config.id, %engine, host = %config.host, port = config.port, "probing database");

        let result = match engine {
            Engine::Postgresql => self.bounded(self.probe_postgres(config)).await,
            Engine::Mysql => self.bounded(self.probe_mysql(config)).await,
        };
        if let Err(e) = &result {
            warn!(database_id = %config.id, %engine, error = %e, "connection probe failed");
        }
        result
    }
}
