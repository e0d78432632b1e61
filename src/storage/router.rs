use std::sync::Arc;

use log::{info, warn};

use crate::configuration::config::StorageConfig;
use crate::configuration::types::BackendKind;
use crate::error_handling::types::StorageError;
use crate::report::Report;
use crate::storage::cache::{CacheStats, CachedStorage};
use crate::storage::database_storage::DatabaseStorage;
use crate::storage::document_storage::DocumentStorage;
use crate::storage::file_storage::FileStorage;
use crate::storage::storage_trait::{HistoryStore, StorageBackend};
use crate::storage::types::HistoryEntry;

/// The single entry point callers use for report persistence.
///
/// Built once from configuration and handed to consumers by reference. The
/// backend is fixed for the router's lifetime; switching backends means
/// building a new router through [`StorageRouter::reload`].
pub struct StorageRouter {
    kind: BackendKind,
    backend: Arc<dyn StorageBackend>,
    history: Arc<dyn HistoryStore>,
    cache: Option<Arc<CachedStorage>>,
}

impl StorageRouter {
    /// Build the configured backend without connecting it.
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        config
            .validate()
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        let router = match config.backend {
            BackendKind::Relational(dialect) => Self::with_backend(
                config.backend,
                Arc::new(DatabaseStorage::from_config(config, dialect)?),
            ),
            BackendKind::Document => Self::with_backend(
                config.backend,
                Arc::new(DocumentStorage::from_config(config)?),
            ),
            BackendKind::File(format) => Self::with_backend(
                config.backend,
                Arc::new(FileStorage::new(&config.data_dir, format)?),
            ),
        };
        Ok(if config.cache.enabled {
            router.cached(config.cache_ttl())
        } else {
            router
        })
    }

    /// Build and connect; the usual startup path.
    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let router = Self::from_config(config)?;
        router.connect()?;
        Ok(router)
    }

    /// Route to an already constructed backend.
    pub fn with_backend<B>(kind: BackendKind, backend: Arc<B>) -> Self
    where
        B: StorageBackend + HistoryStore + 'static,
    {
        Self {
            kind,
            backend: backend.clone(),
            history: backend,
            cache: None,
        }
    }

    /// Put a TTL cache in front of the primary store. History is never cached.
    pub fn cached(mut self, ttl: std::time::Duration) -> Self {
        let cache = Arc::new(CachedStorage::new(self.backend.clone(), ttl));
        self.backend = cache.clone();
        self.cache = Some(cache);
        self
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    /// Disconnect this router, then build and connect one for `config`.
    pub fn reload(self, config: &StorageConfig) -> Result<Self, StorageError> {
        info!("Reloading storage: {} -> {}", self.kind, config.backend);
        self.disconnect();
        drop(self);
        let router = Self::open(config);
        if let Err(e) = &router {
            warn!("Storage reload to {} failed: {}", config.backend, e);
        }
        router
    }
}

impl StorageBackend for StorageRouter {
    fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    fn connect(&self) -> Result<(), StorageError> {
        self.backend.connect()?;
        info!("Storage ready: {}", self.kind);
        Ok(())
    }

    fn disconnect(&self) {
        self.backend.disconnect();
    }

    fn insert(&self, report: &Report) -> Result<(), StorageError> {
        self.backend.insert(report)
    }

    fn get_by_id(&self, report_id: &str) -> Result<Option<Report>, StorageError> {
        self.backend.get_by_id(report_id)
    }

    fn get_by_reported_player(&self, player: &str) -> Result<Option<Report>, StorageError> {
        self.backend.get_by_reported_player(player)
    }

    fn get_by_reporter(&self, reporter: &str) -> Result<Option<Report>, StorageError> {
        self.backend.get_by_reporter(reporter)
    }

    fn get_all(&self) -> Result<Vec<Report>, StorageError> {
        self.backend.get_all()
    }

    fn update(&self, report: &Report) -> Result<bool, StorageError> {
        self.backend.update(report)
    }

    fn delete(&self, report_id: &str) -> Result<bool, StorageError> {
        self.backend.delete(report_id)
    }

    fn exists(&self, report_id: &str) -> Result<bool, StorageError> {
        self.backend.exists(report_id)
    }

    fn count_by_reported_player(&self, player: &str) -> Result<usize, StorageError> {
        self.backend.count_by_reported_player(player)
    }

    fn player_has_report(&self, player: &str) -> Result<bool, StorageError> {
        self.backend.player_has_report(player)
    }

    fn is_resolved(&self, report_id: &str) -> Result<bool, StorageError> {
        self.backend.is_resolved(report_id)
    }
}

impl HistoryStore for StorageRouter {
    fn write_to_history(&self, report: &Report, updater: &str) -> Result<(), StorageError> {
        self.history.write_to_history(report, updater)
    }

    fn get_history(&self, report_id: &str) -> Result<Vec<HistoryEntry>, StorageError> {
        self.history.get_history(report_id)
    }

    fn clear_history(&self, report_id: &str) -> Result<usize, StorageError> {
        self.history.clear_history(report_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::{FileFormat, SqlDialect};
    use std::time::Duration;
    use tempfile::TempDir;

    fn kinds() -> Vec<BackendKind> {
        vec![
            BackendKind::Relational(SqlDialect::Sqlite),
            BackendKind::Relational(SqlDialect::H2),
            BackendKind::File(FileFormat::Structured),
            BackendKind::File(FileFormat::Lines),
            BackendKind::File(FileFormat::Hierarchical),
        ]
    }

    fn run_scenario(router: &StorageRouter) {
        let mut r1 = Report::with_id("R1", "Alice", "Bob", "spam");
        router.insert(&r1).unwrap();
        router.write_to_history(&r1, "Bob").unwrap();

        let mut stored = router.get_by_id("R1").unwrap().unwrap();
        assert_eq!(stored, r1);
        stored.resolve("handled");
        assert!(router.update(&stored).unwrap());
        assert!(router.update(&stored).unwrap());
        router.write_to_history(&stored, "mod").unwrap();

        assert!(router.is_resolved("R1").unwrap());
        assert_eq!(router.count_by_reported_player("Alice").unwrap(), 1);
        assert!(router.player_has_report("Alice").unwrap());
        assert_eq!(
            router.get_by_reporter("Bob").unwrap().unwrap().resolution_comment,
            "handled"
        );

        r1.reason = "dup".to_string();
        assert!(matches!(
            router.insert(&r1),
            Err(StorageError::DuplicateReport(_))
        ));

        assert!(router.delete("R1").unwrap());
        assert!(!router.exists("R1").unwrap());
        assert!(!router.delete("R1").unwrap());
        assert!(!router.player_has_report("Alice").unwrap());

        let history = router.get_history("R1").unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].report.resolved);
        assert!(history[1].report.resolved);
        assert_eq!(router.clear_history("R1").unwrap(), 2);
        assert!(router.get_history("R1").unwrap().is_empty());

        for (id, player, reporter, timestamp) in [
            ("Q1", "Alice", "Bob", 10),
            ("Q2", "Alice", "Carol", 20),
            ("Q3", "Dave", "Bob", 30),
        ] {
            let mut r = Report::with_id(id, player, reporter, "griefing");
            r.timestamp = timestamp;
            router.insert(&r).unwrap();
        }
        assert!(router.resolve_report("Alice", "warned").unwrap());
        assert!(!router.resolve_report("Nobody", "warned").unwrap());
        assert_eq!(router.get_by_id("Q2").unwrap().unwrap().resolution_comment, "warned");

        assert_eq!(router.count_all().unwrap(), 3);
        assert_eq!(router.count_resolved().unwrap(), 1);
        assert_eq!(router.count_unresolved().unwrap(), 2);
        assert_eq!(router.get_all_by_reported_player("Alice").unwrap().len(), 2);
        assert_eq!(router.get_all_by_reported_player("alice").unwrap().len(), 0);
        let mut by_bob: Vec<String> = router
            .get_all_by_reporter("Bob")
            .unwrap()
            .into_iter()
            .map(|r| r.report_id)
            .collect();
        by_bob.sort();
        assert_eq!(by_bob, ["Q1", "Q3"]);
        assert_eq!(router.get_resolved().unwrap()[0].report_id, "Q2");
        assert_eq!(router.get_unresolved().unwrap().len(), 2);
        assert_eq!(router.get_resolved_by_player("Alice").unwrap()[0].report_id, "Q2");
        assert_eq!(router.get_unresolved_by_player("Alice").unwrap()[0].report_id, "Q1");
        assert!(router.get_resolved_by_player("Dave").unwrap().is_empty());
    }

    #[test]
    fn test_scenario_on_every_local_backend() {
        for kind in kinds() {
            let dir = TempDir::new().unwrap();
            let config = StorageConfig::new(kind, dir.path());
            let router = StorageRouter::open(&config).unwrap();
            assert_eq!(router.kind(), kind);
            assert!(router.cache_stats().is_none());
            run_scenario(&router);
            router.disconnect();
        }
    }

    #[test]
    fn test_scenario_with_cache() {
        for kind in kinds() {
            let dir = TempDir::new().unwrap();
            let config = StorageConfig::new(kind, dir.path()).with_cache(Duration::from_secs(60));
            let router = StorageRouter::open(&config).unwrap();
            run_scenario(&router);
            assert!(router.cache_stats().unwrap().hits > 0);
        }
    }

    #[test]
    fn test_reload_switches_backend() {
        let dir = TempDir::new().unwrap();
        let files = StorageConfig::new(BackendKind::File(FileFormat::Structured), dir.path());
        let router = StorageRouter::open(&files).unwrap();
        router.insert(&Report::with_id("R1", "Alice", "Bob", "spam")).unwrap();

        let sqlite = StorageConfig::new(BackendKind::Relational(SqlDialect::Sqlite), dir.path());
        let router = router.reload(&sqlite).unwrap();
        assert_eq!(router.backend_name(), "sqlite");
        assert!(!router.exists("R1").unwrap());

        let router = router.reload(&files).unwrap();
        assert!(router.exists("R1").unwrap());
    }

    #[test]
    fn test_unreachable_database_fails_at_open() {
        let dir = TempDir::new().unwrap();
        let mut config =
            StorageConfig::new(BackendKind::Relational(SqlDialect::Postgres), dir.path());
        config.sql.url = Some("postgres://user:pw@127.0.0.1:1/reports".to_string());
        let err = StorageRouter::open(&config).err().unwrap();
        assert!(err.is_connection());
    }
}
