use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DumpError, UnsupportedEngine};

/// A registered database connection, as read from the registry.
///
/// `engine` keeps the raw registry value so that an unknown engine surfaces as a
/// per-job failure instead of a registry read error.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub id: String,
    pub name: String,
    pub engine: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Postgresql,
    Mysql,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Postgresql => "postgresql",
            Engine::Mysql => "mysql",
        }
    }

    /// File extension of the artifact the engine's dump tool produces.
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            Engine::Postgresql => "dump",
            Engine::Mysql => "sql",
        }
    }
}

impl FromStr for Engine {
    type Err = UnsupportedEngine;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Engine::Postgresql),
            "mysql" => Ok(Engine::Mysql),
            _ => Err(UnsupportedEngine(raw.to_owned())),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DatabaseConfig {
    pub fn engine(&self) -> Result<Engine, UnsupportedEngine> {
        self.engine.parse()
    }

    /// Checks every field that ends up on a dump tool's command line.
    ///
    /// Values are passed as discrete arguments, but a leading `-` would still be
    /// read as an option by the tool, so it is rejected along with anything
    /// outside the allowed character sets.
    pub fn validate(&self) -> Result<(), DumpError> {
        if self.port == 0 {
            return Err(DumpError::invalid("port", "must be a positive integer"));
        }
        check_field("host", &self.host, 253, |c| {
            c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '[' | ']')
        })?;
        check_field("username", &self.username, 128, |c| {
            c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@' | '$')
        })?;
        check_field("database", &self.database, 128, |c| {
            c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '$')
        })?;
        Ok(())
    }
}

fn check_field(
    field: &'static str,
    value: &str,
    max_len: usize,
    allowed: impl Fn(char) -> bool,
) -> Result<(), DumpError> {
    if value.is_empty() {
        return Err(DumpError::invalid(field, "must not be empty"));
    }
    if value.len() > max_len {
        return Err(DumpError::invalid(
            field,
            format!("longer than {max_len} characters"),
        ));
    }
    if value.starts_with('-') {
        return Err(DumpError::invalid(field, "must not start with '-'"));
    }
    if let Some(bad) = value.chars().find(|c| !allowed(*c)) {
        return Err(DumpError::invalid(
            field,
            format!("contains disallowed character {bad:?}"),
        ));
    }
    Ok(())
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            id: "db-1".into(),
            name: "orders".into(),
            engine: "postgresql".into(),
            host: "db1.internal".into(),
            port: 5432,
            username: "backup_user".into(),
            password: "s3cret".into(),
            database: "orders".into(),
        }
    }

    #[test]
    fn parses_known_engines_case_insensitively() {
        assert_eq!("postgresql".parse::<Engine>(), Ok(Engine::Postgresql));
        assert_eq!(" PostgreSQL ".parse::<Engine>(), Ok(Engine::Postgresql));
        assert_eq!("postgres".parse::<Engine>(), Ok(Engine::Postgresql));
        assert_eq!("MySQL".parse::<Engine>(), Ok(Engine::Mysql));
    }

    #[test]
    fn unknown_engine_is_rejected_with_raw_value() {
        let mut cfg = config();
        cfg.engine = "oracle".into();
        let err = cfg.engine().unwrap_err();
        assert_eq!(err, UnsupportedEngine("oracle".into()));
    }

    #[test]
    fn valid_config_passes() {
        config().validate().expect("valid");

        let mut ipv6 = config();
        ipv6.host = "[::1]".into();
        ipv6.validate().expect("ipv6 literal");
    }

    #[test]
    fn shell_metacharacters_are_rejected() {
        let mut cfg = config();
        cfg.host = "db1; rm -rf /".into();
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(err.to_string().starts_with("invalid host"));

        let mut cfg = config();
        cfg.database = "orders$(whoami)".into();
        assert!(cfg.validate().is_err());

        let mut cfg = config();
        cfg.username = "u`id`".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn option_like_values_are_rejected() {
        let mut cfg = config();
        cfg.database = "--file=/etc/passwd".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must not start with '-'"));
    }

    #[test]
    fn empty_fields_and_zero_port_are_rejected() {
        let mut cfg = config();
        cfg.username.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = config();
        cfg.port = 0;
        assert!(cfg.validate().unwrap_err().to_string().contains("port"));
    }

    #[test]
    fn debug_output_redacts_password() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }
}
