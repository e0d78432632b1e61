use super::types::*;
use crate::error_handling::types::ConfigError;
use log::{debug, warn};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration structure.
///
/// This structure holds everything the storage layer needs at startup: which
/// backend to build, how to reach it, and whether to put the cache in front of
/// it. It is read from a TOML file with [`Config::from_file`]; every section has
/// defaults so a minimal file only names the backend.
///
/// # Examples
///
/// ```
/// use reportstore::configuration::config::Config;
///
/// let config = Config::from_toml_str(r#"
///     [storage]
///     backend = "file/structured"
///     data_dir = "/var/lib/reports"
/// "#).unwrap();
/// assert_eq!(config.storage.data_dir.to_str(), Some("/var/lib/reports"));
/// ```
///
/// # Fields Overview
///
/// - `storage.backend`: backend selector, e.g. `relational/sqlite`, `document/mongo`,
///   `file/lines`
/// - `storage.data_dir`: root for file backends and embedded databases
/// - `storage.sql`: relational connection parameters
/// - `storage.mongo`: document store connection parameters
/// - `storage.cache`: optional cache with a TTL in seconds
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorageConfig {
    pub backend: BackendKind,

    /// Root directory for file backends and embedded database files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub sql: SqlSettings,

    #[serde(default)]
    pub mongo: MongoSettings,

    #[serde(default)]
    pub cache: CacheSettings,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl StorageConfig {
    pub fn new(backend: BackendKind, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            data_dir: data_dir.into(),
            sql: SqlSettings::default(),
            mongo: MongoSettings::default(),
            cache: CacheSettings::default(),
        }
    }

    pub fn with_cache(mut self, ttl: Duration) -> Self {
        self.cache = CacheSettings {
            enabled: true,
            ttl_secs: ttl.as_secs(),
            ttl_millis: Some(ttl.as_millis() as u64),
        };
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        match self.cache.ttl_millis {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_secs(self.cache.ttl_secs),
        }
    }

    /// Reject settings that would only fail later, at connect time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.enabled && self.cache_ttl().is_zero() {
            return Err(ConfigError::NotInRange(
                "storage.cache TTL must be greater than 0 when the cache is enabled".into(),
            ));
        }
        match self.backend {
            BackendKind::File(_) | BackendKind::Relational(SqlDialect::Sqlite | SqlDialect::H2) => {
                if self.data_dir.as_os_str().is_empty() {
                    return Err(ConfigError::MissingValue("storage.data_dir".into()));
                }
            }
            _ => {}
        }
        match self.backend {
            BackendKind::Relational(_) if self.sql.url.is_none() && self.sql.database.is_empty() => {
                Err(ConfigError::MissingValue("storage.sql.database".into()))
            }
            BackendKind::Document if self.mongo.database.is_empty() => {
                Err(ConfigError::MissingValue("storage.mongo.database".into()))
            }
            _ => Ok(()),
        }
    }

    /// Connection URL for the relational backend.
    ///
    /// SQLite and H2 resolve to a database file under `sql.path`, which is
    /// itself relative to `data_dir` unless absolute.
    pub fn sql_url(&self, dialect: SqlDialect) -> String {
        if let Some(url) = &self.sql.url {
            return url.clone();
        }
        let sql = &self.sql;
        match dialect {
            SqlDialect::MySql => format!(
                "mysql://{}@{}:{}/{}",
                credentials(&sql.username, &sql.password),
                sql.host,
                sql.port.unwrap_or(3306),
                sql.database
            ),
            SqlDialect::Postgres => format!(
                "postgres://{}@{}:{}/{}",
                credentials(&sql.username, &sql.password),
                sql.host,
                sql.port.unwrap_or(5432),
                sql.database
            ),
            SqlDialect::Sqlite | SqlDialect::H2 => {
                format!("sqlite://{}?mode=rwc", self.sqlite_file().display())
            }
        }
    }

    /// Path of the embedded database file used by SQLite and H2.
    pub fn sqlite_file(&self) -> PathBuf {
        let dir = if self.sql.path.is_absolute() {
            self.sql.path.clone()
        } else {
            self.data_dir.join(&self.sql.path)
        };
        let name = if self.sql.database.ends_with(".db") {
            self.sql.database.clone()
        } else {
            format!("{}.db", self.sql.database)
        };
        dir.join(name)
    }

    pub fn mongo_uri(&self) -> String {
        if let Some(uri) = &self.mongo.uri {
            return uri.clone();
        }
        let m = &self.mongo;
        if m.username.is_empty() {
            format!("mongodb://{}:{}", m.host, m.port)
        } else {
            format!(
                "mongodb://{}@{}:{}/?authSource=admin",
                credentials(&m.username, &m.password),
                m.host,
                m.port
            )
        }
    }
}

/// URL user-info, percent-encoded so reserved characters stay inside it.
fn credentials(username: &str, password: &str) -> String {
    let username = urlencoding::encode(username);
    if password.is_empty() {
        username.into_owned()
    } else {
        format!("{}:{}", username, urlencoding::encode(password))
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.storage.validate()?;
        if config.storage.cache.enabled && config.storage.cache_ttl().as_secs() > 24 * 3600 {
            warn!(
                "Cache TTL of {:?} is unusually long; stale reads may persist",
                config.storage.cache_ttl()
            );
        }
        Ok(config)
    }

    /// Apply command-line/environment overrides on top of the file.
    pub fn apply_overrides(
        &mut self,
        backend: Option<BackendKind>,
        data_dir: Option<PathBuf>,
    ) -> Result<(), ConfigError> {
        if let Some(backend) = backend {
            self.storage.backend = backend;
        }
        if let Some(data_dir) = data_dir {
            self.storage.data_dir = data_dir;
        }
        self.storage.validate()
    }
}
