pub mod config;
pub mod types;

pub use config::{Config, StorageConfig};
pub use types::{BackendKind, FileFormat, SqlDialect};
