use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::error_handling::types::StorageError;
use crate::report::Report;
use crate::storage::storage_trait::StorageBackend;

struct CacheEntry {
    report: Report,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Snapshot of cache effectiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub id_entries: usize,
    pub player_entries: usize,
}

/// `true` if `a` wins over `b` under the most-recent policy.
fn outranks(a: &Report, b: &Report) -> bool {
    (a.timestamp, a.report_id.as_str()) >= (b.timestamp, b.report_id.as_str())
}

/// TTL cache in front of any `StorageBackend`.
///
/// Entries are keyed by report id and by reported player. The player-keyed
/// entry always holds the most recent report for that player as of when it
/// was filled; writes only replace it with a record that ranks at least as
/// high. Misses fall through to the wrapped backend and repopulate.
pub struct CachedStorage {
    inner: Arc<dyn StorageBackend>,
    ttl: Duration,
    by_id: Mutex<HashMap<String, CacheEntry>>,
    by_player: Mutex<HashMap<String, CacheEntry>>,
    last_sweep: Mutex<Instant>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn StorageBackend>, ttl: Duration) -> Self {
        info!(
            "Caching {} storage with a TTL of {:?}",
            inner.backend_name(),
            ttl
        );
        Self {
            inner,
            ttl,
            by_id: Mutex::new(HashMap::new()),
            by_player: Mutex::new(HashMap::new()),
            last_sweep: Mutex::new(Instant::now()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            id_entries: lock(&self.by_id).len(),
            player_entries: lock(&self.by_player).len(),
        }
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for map in [&self.by_id, &self.by_player] {
            let mut map = lock(map);
            let before = map.len();
            map.retain(|_, entry| entry.is_fresh(now));
            removed += before - map.len();
        }
        if removed > 0 {
            debug!("Purged {} expired cache entr(ies)", removed);
        }
        removed
    }

    pub fn clear(&self) {
        lock(&self.by_id).clear();
        lock(&self.by_player).clear();
    }

    fn entry(&self, report: &Report) -> CacheEntry {
        CacheEntry {
            report: report.clone(),
            expires_at: Instant::now() + self.ttl,
        }
    }

    fn lookup(map: &Mutex<HashMap<String, CacheEntry>>, key: &str) -> Option<Report> {
        let mut map = lock(map);
        let now = Instant::now();
        match map.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.report.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    fn record(&self, hit: Option<Report>) -> Option<Report> {
        let counter = if hit.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    /// Purge at most once per TTL period, so entries that are never read
    /// again do not accumulate.
    fn sweep_if_due(&self) {
        let now = Instant::now();
        {
            let mut last = lock(&self.last_sweep);
            if now.duration_since(*last) < self.ttl {
                return;
            }
            *last = now;
        }
        self.purge_expired();
    }

    fn remember_id(&self, report: &Report) {
        self.sweep_if_due();
        lock(&self.by_id).insert(report.report_id.clone(), self.entry(report));
    }

    /// Replace the player entry if `report` ranks at least as high as the
    /// cached one. Without a fresh entry nothing is known about the other
    /// reports for the player, so nothing is cached.
    fn offer_player(&self, report: &Report) {
        let mut map = lock(&self.by_player);
        let now = Instant::now();
        if let Some(entry) = map.get_mut(&report.reported_player) {
            if entry.is_fresh(now)
                && (entry.report.report_id == report.report_id || outranks(report, &entry.report))
            {
                *entry = self.entry(report);
            }
        }
    }

    /// Forget everything cached about one record.
    fn invalidate(&self, report_id: &str) {
        lock(&self.by_id).remove(report_id);
        lock(&self.by_player).retain(|_, entry| entry.report.report_id != report_id);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl StorageBackend for CachedStorage {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    fn connect(&self) -> Result<(), StorageError> {
        self.inner.connect()
    }

    fn disconnect(&self) {
        self.clear();
        self.inner.disconnect();
    }

    fn insert(&self, report: &Report) -> Result<(), StorageError> {
        self.inner.insert(report)?;
        self.remember_id(report);
        self.offer_player(report);
        Ok(())
    }

    fn get_by_id(&self, report_id: &str) -> Result<Option<Report>, StorageError> {
        if let Some(report) = self.record(Self::lookup(&self.by_id, report_id)) {
            return Ok(Some(report));
        }
        let found = self.inner.get_by_id(report_id)?;
        if let Some(report) = &found {
            self.remember_id(report);
        }
        Ok(found)
    }

    fn get_by_reported_player(&self, player: &str) -> Result<Option<Report>, StorageError> {
        if let Some(report) = self.record(Self::lookup(&self.by_player, player)) {
            return Ok(Some(report));
        }
        let found = self.inner.get_by_reported_player(player)?;
        if let Some(report) = &found {
            self.remember_id(report);
            lock(&self.by_player).insert(player.to_string(), self.entry(report));
        }
        Ok(found)
    }

    fn get_by_reporter(&self, reporter: &str) -> Result<Option<Report>, StorageError> {
        self.inner.get_by_reporter(reporter)
    }

    fn get_all(&self) -> Result<Vec<Report>, StorageError> {
        self.inner.get_all()
    }

    fn update(&self, report: &Report) -> Result<bool, StorageError> {
        // the reported player may have changed, so old player entries go too
        self.invalidate(&report.report_id);
        if !self.inner.update(report)? {
            return Ok(false);
        }
        self.remember_id(report);
        self.offer_player(report);
        Ok(true)
    }

    fn delete(&self, report_id: &str) -> Result<bool, StorageError> {
        let removed = self.inner.delete(report_id);
        self.invalidate(report_id);
        removed
    }

    fn exists(&self, report_id: &str) -> Result<bool, StorageError> {
        if self.record(Self::lookup(&self.by_id, report_id)).is_some() {
            return Ok(true);
        }
        self.inner.exists(report_id)
    }

    fn count_by_reported_player(&self, player: &str) -> Result<usize, StorageError> {
        self.inner.count_by_reported_player(player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::FileFormat;
    use crate::storage::file_storage::FileStorage;
    use std::fs;
    use std::thread;
    use tempfile::TempDir;

    const LONG: Duration = Duration::from_secs(300);

    fn report(id: &str, player: &str, timestamp: i64) -> Report {
        let mut r = Report::with_id(id, player, "Bob", "spam");
        r.timestamp = timestamp;
        r
    }

    fn cached(ttl: Duration) -> (TempDir, Arc<FileStorage>, CachedStorage) {
        let dir = TempDir::new().unwrap();
        let files = Arc::new(FileStorage::new(dir.path(), FileFormat::Structured).unwrap());
        let cache = CachedStorage::new(files.clone(), ttl);
        (dir, files, cache)
    }

    /// Remove a record behind the cache's back.
    fn remove_file(dir: &TempDir, id: &str) {
        fs::remove_file(dir.path().join(format!("reports/{}.json", id))).unwrap();
    }

    #[test]
    fn test_get_after_update_sees_new_value() {
        let (_dir, _files, cache) = cached(LONG);
        let mut r = report("R1", "Alice", 1);
        cache.insert(&r).unwrap();
        assert_eq!(cache.get_by_id("R1").unwrap(), Some(r.clone()));
        r.resolve("handled");
        assert!(cache.update(&r).unwrap());
        assert!(cache.get_by_id("R1").unwrap().unwrap().resolved);
        assert!(cache.is_resolved("R1").unwrap());
    }

    #[test]
    fn test_hits_are_served_without_backend() {
        let (dir, _files, cache) = cached(LONG);
        cache.insert(&report("R1", "Alice", 1)).unwrap();
        remove_file(&dir, "R1");
        assert!(cache.get_by_id("R1").unwrap().is_some());
        assert!(cache.exists("R1").unwrap());
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.id_entries, 1);
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let (dir, _files, cache) = cached(Duration::from_millis(50));
        cache.insert(&report("R1", "Alice", 1)).unwrap();
        remove_file(&dir, "R1");
        thread::sleep(Duration::from_millis(100));
        assert_eq!(cache.get_by_id("R1").unwrap(), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_purge_expired() {
        let (_dir, _files, cache) = cached(Duration::from_millis(20));
        cache.insert(&report("R1", "Alice", 1)).unwrap();
        cache.get_by_reported_player("Alice").unwrap();
        assert_eq!(cache.stats().player_entries, 1);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.stats(), CacheStats { misses: 1, ..Default::default() });
    }

    #[test]
    fn test_expired_entries_do_not_accumulate() {
        let (_dir, _files, cache) = cached(Duration::from_millis(10));
        for i in 0..200 {
            cache.insert(&report(&format!("old-{}", i), "Alice", i)).unwrap();
        }
        thread::sleep(Duration::from_millis(50));
        for i in 0..10 {
            cache.insert(&report(&format!("new-{}", i), "Alice", 1_000 + i)).unwrap();
        }
        assert!(cache.stats().id_entries <= 10);
    }

    #[test]
    fn test_delete_invalidates_both_keys() {
        let (_dir, _files, cache) = cached(LONG);
        cache.insert(&report("R1", "Alice", 100)).unwrap();
        cache.insert(&report("R2", "Alice", 200)).unwrap();
        assert_eq!(
            cache.get_by_reported_player("Alice").unwrap().unwrap().report_id,
            "R2"
        );
        assert!(cache.delete("R2").unwrap());
        assert_eq!(cache.get_by_id("R2").unwrap(), None);
        assert_eq!(
            cache.get_by_reported_player("Alice").unwrap().unwrap().report_id,
            "R1"
        );
        assert!(!cache.delete("R2").unwrap());
    }

    #[test]
    fn test_player_entry_keeps_most_recent() {
        let (_dir, _files, cache) = cached(LONG);
        cache.insert(&report("R1", "Alice", 100)).unwrap();
        assert_eq!(
            cache.get_by_reported_player("Alice").unwrap().unwrap().report_id,
            "R1"
        );
        cache.insert(&report("R0", "Alice", 50)).unwrap();
        assert_eq!(
            cache.get_by_reported_player("Alice").unwrap().unwrap().report_id,
            "R1"
        );
        cache.insert(&report("R2", "Alice", 200)).unwrap();
        assert_eq!(
            cache.get_by_reported_player("Alice").unwrap().unwrap().report_id,
            "R2"
        );
    }

    #[test]
    fn test_update_moving_report_to_other_player() {
        let (_dir, _files, cache) = cached(LONG);
        let mut r = report("R1", "Alice", 100);
        cache.insert(&r).unwrap();
        cache.get_by_reported_player("Alice").unwrap();
        r.reported_player = "Carol".to_string();
        assert!(cache.update(&r).unwrap());
        assert_eq!(cache.get_by_reported_player("Alice").unwrap(), None);
        assert_eq!(
            cache.get_by_reported_player("Carol").unwrap().unwrap().report_id,
            "R1"
        );
    }

    #[test]
    fn test_failed_update_leaves_nothing_cached() {
        let (_dir, _files, cache) = cached(LONG);
        assert!(!cache.update(&report("ghost", "Alice", 1)).unwrap());
        assert_eq!(cache.get_by_id("ghost").unwrap(), None);
        assert_eq!(cache.stats().id_entries, 0);
    }

    #[test]
    fn test_duplicate_insert_keeps_cached_original() {
        let (_dir, _files, cache) = cached(LONG);
        let original = report("R1", "Alice", 1);
        cache.insert(&original).unwrap();
        assert!(matches!(
            cache.insert(&report("R1", "Mallory", 2)),
            Err(StorageError::DuplicateReport(_))
        ));
        assert_eq!(cache.get_by_id("R1").unwrap(), Some(original));
    }
}
