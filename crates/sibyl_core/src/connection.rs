//! Registered data sources and the uniform adapter configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported database back-ends.
///
/// # Examples
///
/// ```
/// use sibyl_core::DatabaseKind;
///
/// assert_eq!(DatabaseKind::Postgres.as_str(), "postgres");
/// assert_eq!("clickhouse".parse::<DatabaseKind>().unwrap(), DatabaseKind::ClickHouse);
/// assert!("oracle".parse::<DatabaseKind>().is_err());
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// PostgreSQL
    #[display("postgres")]
    Postgres,
    /// MySQL
    #[display("mysql")]
    MySql,
    /// ClickHouse over its HTTP interface
    #[display("clickhouse")]
    ClickHouse,
    /// SQLite (the `database` field holds a file path)
    #[display("sqlite")]
    Sqlite,
    /// MongoDB (queries are extended-JSON command documents)
    #[display("mongodb")]
    MongoDb,
}

impl DatabaseKind {
    /// Stable tag used as the factory key and in wire payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::ClickHouse => "clickhouse",
            Self::Sqlite => "sqlite",
            Self::MongoDb => "mongodb",
        }
    }
}

impl std::str::FromStr for DatabaseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            "clickhouse" => Ok(Self::ClickHouse),
            "sqlite" => Ok(Self::Sqlite),
            "mongodb" => Ok(Self::MongoDb),
            other => Err(format!("unknown database kind: {other}")),
        }
    }
}

/// TLS posture for a connection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// Plaintext
    #[default]
    #[display("disable")]
    Disable,
    /// TLS without certificate verification
    #[display("require")]
    Require,
    /// TLS verifying the CA chain
    #[display("verify-ca")]
    VerifyCa,
    /// TLS verifying the CA chain and host name
    #[display("verify-full")]
    VerifyFull,
}

impl SslMode {
    /// Whether any TLS handshake is requested.
    pub fn is_tls(&self) -> bool {
        !matches!(self, Self::Disable)
    }
}

/// A registered data source within a workspace.
///
/// Credentials are stored encrypted; the plaintext password travels only
/// through `ConnectionConfig` after the credential store decrypts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Connection id
    pub id: Uuid,
    /// Owning workspace
    pub workspace_id: Uuid,
    /// Display name
    pub name: String,
    /// Database back-end
    pub kind: DatabaseKind,
    /// Host name (ignored for SQLite)
    pub host: String,
    /// Port (ignored for SQLite)
    pub port: u16,
    /// Database name, or file path for SQLite
    pub database: String,
    /// Login user (ignored for SQLite)
    pub username: String,
    /// Opaque encrypted credentials; never serialized outward
    #[serde(skip_serializing, default)]
    pub credentials_encrypted: Vec<u8>,
    /// TLS posture
    pub ssl_mode: SslMode,
    /// Advisory read-only flag
    pub read_only: bool,
    /// Hard cap on returned rows, 1..=10000
    pub max_rows: u32,
    /// Hard cap on query wall-clock, 1..=300 seconds
    pub timeout_seconds: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Inclusive bounds for `Connection::max_rows`.
pub const MAX_ROWS_RANGE: std::ops::RangeInclusive<u32> = 1..=10_000;
/// Inclusive bounds for `Connection::timeout_seconds`.
pub const TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=300;

impl Connection {
    /// Build the uniform adapter configuration, filling in the decrypted
    /// password supplied by the credential store.
    pub fn to_config(&self, password: String) -> ConnectionConfig {
        ConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            username: self.username.clone(),
            password,
            ssl_mode: self.ssl_mode,
            max_rows: self.max_rows,
            timeout_seconds: self.timeout_seconds,
        }
    }
}

/// Uniform connection parameters handed to every adapter.
///
/// SQLite reads `database` as a file path and ignores the network fields;
/// MongoDB interprets the query string as a command document. Carries the
/// decrypted password, so it is never serialized.
#[derive(Debug, Clone, PartialEq, derive_getters::Getters)]
pub struct ConnectionConfig {
    /// Host name
    host: String,
    /// Port
    port: u16,
    /// Database name or file path
    database: String,
    /// Login user
    username: String,
    /// Decrypted password
    password: String,
    /// TLS posture
    ssl_mode: SslMode,
    /// Row cap carried from the connection row
    max_rows: u32,
    /// Timeout carried from the connection row
    timeout_seconds: u64,
}

impl ConnectionConfig {
    /// Creates a new builder-free config; tests and demos use this directly.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        ssl_mode: SslMode,
        max_rows: u32,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: password.into(),
            ssl_mode,
            max_rows,
            timeout_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_kind_round_trips_through_str() {
        for kind in [
            DatabaseKind::Postgres,
            DatabaseKind::MySql,
            DatabaseKind::ClickHouse,
            DatabaseKind::Sqlite,
            DatabaseKind::MongoDb,
        ] {
            assert_eq!(kind.as_str().parse::<DatabaseKind>().unwrap(), kind);
        }
    }

    #[test]
    fn ssl_mode_serializes_kebab_case() {
        let json = serde_json::to_string(&SslMode::VerifyFull).unwrap();
        assert_eq!(json, "\"verify-full\"");
        assert!(!SslMode::Disable.is_tls());
        assert!(SslMode::Require.is_tls());
    }
}
