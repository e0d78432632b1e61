use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    UnknownBackend(String),
    MissingValue(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::UnknownBackend(e) => write!(f, "Unknown storage backend: {}", e),
            ConfigError::MissingValue(e) => write!(f, "Missing configuration value: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlError(err.to_string())
    }
}

/// Failures surfaced by storage backends.
///
/// "Not found" is never an error: lookups return `Option`, and `update` /
/// `delete` return `false`.
#[derive(Debug)]
pub enum StorageError {
    /// The medium could not be reached (startup or call time).
    ConnectionFailed(String),
    /// The backend needs `connect()` before it can serve calls.
    NotConnected,
    /// A record with this id already exists.
    DuplicateReport(String),
    /// The report cannot be stored as given (empty or unsafe id).
    InvalidReport(String),
    /// Serialization or medium-level write failure; the record is unchanged.
    WriteFailed(String),
    /// Medium-level read failure.
    ReadFailed(String),
    /// A single stored record could not be decoded.
    CorruptRecord { id: String, reason: String },
}

impl StorageError {
    pub fn corrupt(id: impl Into<String>, reason: impl fmt::Display) -> Self {
        StorageError::CorruptRecord {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            StorageError::ConnectionFailed(_) | StorageError::NotConnected
        )
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(e) => write!(f, "Storage connection failed: {}", e),
            StorageError::NotConnected => write!(f, "Storage backend is not connected"),
            StorageError::DuplicateReport(id) => write!(f, "Report {} already exists", id),
            StorageError::InvalidReport(e) => write!(f, "Invalid report: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
            StorageError::CorruptRecord { id, reason } => {
                write!(f, "Corrupt record {}: {}", id, reason)
            }
        }
    }
}

impl std::error::Error for StorageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::DuplicateReport("R1".into());
        assert_eq!(err.to_string(), "Report R1 already exists");
        let err = StorageError::corrupt("R2", "missing field `reportId`");
        assert_eq!(err.to_string(), "Corrupt record R2: missing field `reportId`");
    }

    #[test]
    fn test_connection_classification() {
        assert!(StorageError::NotConnected.is_connection());
        assert!(StorageError::ConnectionFailed("refused".into()).is_connection());
        assert!(!StorageError::WriteFailed("disk full".into()).is_connection());
    }
}
