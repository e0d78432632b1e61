use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::error_handling::types::ConfigError;

/// SQL engines reachable through the relational backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    MySql,
    Postgres,
    Sqlite,
    /// Embedded JVM database; served by an SQLite file.
    H2,
}

/// Serialization used by the file backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// JSON documents
    Structured,
    /// flat `key=value` lines
    Lines,
    /// TOML tables
    Hierarchical,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Structured => "json",
            FileFormat::Lines => "properties",
            FileFormat::Hierarchical => "toml",
        }
    }
}

/// The backend selector from the `storage.backend` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum BackendKind {
    Relational(SqlDialect),
    Document,
    File(FileFormat),
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim().to_ascii_lowercase().as_str() {
            "relational/mysql" | "mysql" => BackendKind::Relational(SqlDialect::MySql),
            "relational/postgresql" | "relational/postgres" | "postgresql" | "postgres" => {
                BackendKind::Relational(SqlDialect::Postgres)
            }
            "relational/sqlite" | "sqlite" => BackendKind::Relational(SqlDialect::Sqlite),
            "relational/h2" | "h2" => BackendKind::Relational(SqlDialect::H2),
            "document/mongo" | "document/mongodb" | "mongo" | "mongodb" => BackendKind::Document,
            "file/structured" | "filesystem" | "json" => BackendKind::File(FileFormat::Structured),
            "file/lines" | "text" => BackendKind::File(FileFormat::Lines),
            "file/hierarchical" | "toml" => BackendKind::File(FileFormat::Hierarchical),
            other => return Err(ConfigError::UnknownBackend(other.to_string())),
        };
        Ok(kind)
    }
}

impl TryFrom<String> for BackendKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Relational(SqlDialect::MySql) => "relational/mysql",
            BackendKind::Relational(SqlDialect::Postgres) => "relational/postgresql",
            BackendKind::Relational(SqlDialect::Sqlite) => "relational/sqlite",
            BackendKind::Relational(SqlDialect::H2) => "relational/h2",
            BackendKind::Document => "document/mongo",
            BackendKind::File(FileFormat::Structured) => "file/structured",
            BackendKind::File(FileFormat::Lines) => "file/lines",
            BackendKind::File(FileFormat::Hierarchical) => "file/hierarchical",
        };
        f.write_str(name)
    }
}

/// Connection parameters for the relational backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SqlSettings {
    /// Full connection URL; when set, the other fields are ignored.
    pub url: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub database: String,
    /// Directory holding the database file for SQLite/H2.
    /// Relative paths are resolved against `storage.data_dir`.
    pub path: PathBuf,
}

impl Default for SqlSettings {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: None,
            username: "root".to_string(),
            password: String::new(),
            database: "reports".to_string(),
            path: PathBuf::from("database"),
        }
    }
}

/// Connection parameters for the document backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MongoSettings {
    pub uri: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl Default for MongoSettings {
    fn default() -> Self {
        Self {
            uri: None,
            host: "localhost".to_string(),
            port: 27017,
            username: String::new(),
            password: String::new(),
            database: "reportPlugin".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
    /// Sub-second TTL; takes precedence over `ttl_secs` when set.
    pub ttl_millis: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 300,
            ttl_millis: None,
        }
    }
}
