pub mod configuration;
pub use configuration::{BackendKind, Config, FileFormat, SqlDialect, StorageConfig};

pub mod error_handling;
pub use error_handling::{ConfigError, StorageError};

pub mod report;
pub use report::{Location, Report};

pub mod storage;
pub use storage::{HistoryEntry, HistoryStore, StorageBackend, StorageRouter};
