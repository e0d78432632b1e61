//! Storage subsystem
//!
//! This module provides the persistence layer for reports and their update
//! history.
//!
//! Components:
//! - `storage_trait`: the `StorageBackend` and `HistoryStore` traits every backend implements.
//! - `types`: shared data types used by storage backends.
//! - `database_storage`: SeaORM implementation for MySQL, PostgreSQL and SQLite.
//! - `document_storage`: MongoDB implementation.
//! - `file_storage`: one file per report, written atomically.
//! - `file_format`: the JSON, TOML and `key=value` encodings used by `file_storage`.
//! - `cache`: TTL cache decorator for any backend.
//! - `router`: builds the configured backend and exposes it to callers.
//! - `db_entities`: SeaORM entity models for the database backend.

pub mod cache;
pub mod database_storage;
pub mod db_entities;
pub mod document_storage;
pub mod file_format;
pub mod file_storage;
pub mod router;
pub mod storage_trait;
pub mod types;

pub use router::StorageRouter;
pub use storage_trait::{HistoryStore, StorageBackend};
pub use types::HistoryEntry;
