//! Storage Traits
//!
//! This module defines the two contracts every storage technology implements:
//!
//! - `StorageBackend`: the primary store of current report snapshots
//! - `HistoryStore`: the append-only update history of each report
//!
//! Implementors are responsible for:
//! - Persisting full report snapshots keyed by report id
//! - Answering lookups by id, reported player and reporter
//! - Skipping (and logging) corrupt records in bulk reads
//! - Appending, listing and clearing history entries
//!
//! All methods return a `Result`; "not found" is expressed as `None` or
//! `false`, never as an error.

use crate::error_handling::types::StorageError;
use crate::report::Report;
use crate::storage::types::HistoryEntry;

/// The operation set every backend implements with identical guarantees.
pub trait StorageBackend: Send + Sync {
    /// Short name used in log lines.
    fn backend_name(&self) -> &'static str;

    /// Open (or verify) the medium and create tables/directories if absent.
    ///
    /// Idempotent. A failure here is fatal to startup.
    fn connect(&self) -> Result<(), StorageError>;

    /// Release whatever `connect` acquired. Idempotent.
    fn disconnect(&self);

    /// Persist a new report. Fails with `DuplicateReport` if the id exists.
    fn insert(&self, report: &Report) -> Result<(), StorageError>;

    fn get_by_id(&self, report_id: &str) -> Result<Option<Report>, StorageError>;

    /// The most recent report (by `timestamp`) filed against `player`.
    fn get_by_reported_player(&self, player: &str) -> Result<Option<Report>, StorageError>;

    /// The most recent report (by `timestamp`) filed by `reporter`.
    fn get_by_reporter(&self, reporter: &str) -> Result<Option<Report>, StorageError>;

    /// Every current report, in backend-defined order. Corrupt records are
    /// skipped with a warning.
    fn get_all(&self) -> Result<Vec<Report>, StorageError>;

    /// Replace the stored snapshot with the same id.
    ///
    /// Returns `false` if no such report exists; nothing is written then.
    fn update(&self, report: &Report) -> Result<bool, StorageError>;

    /// Returns `true` iff a report existed and was removed.
    fn delete(&self, report_id: &str) -> Result<bool, StorageError>;

    fn exists(&self, report_id: &str) -> Result<bool, StorageError>;

    /// Counts only records that decode, the same ones `get_all` returns.
    fn count_by_reported_player(&self, player: &str) -> Result<usize, StorageError>;

    fn player_has_report(&self, player: &str) -> Result<bool, StorageError> {
        Ok(self.count_by_reported_player(player)? > 0)
    }

    /// `false` when the report does not exist.
    fn is_resolved(&self, report_id: &str) -> Result<bool, StorageError> {
        Ok(self
            .get_by_id(report_id)?
            .map(|r| r.resolved)
            .unwrap_or(false))
    }

    // Query helpers over `get_all`. Name matches are exact.

    fn get_all_by_reported_player(&self, player: &str) -> Result<Vec<Report>, StorageError> {
        Ok(retain(self.get_all()?, |r| r.reported_player == player))
    }

    fn get_all_by_reporter(&self, reporter: &str) -> Result<Vec<Report>, StorageError> {
        Ok(retain(self.get_all()?, |r| r.reporter == reporter))
    }

    fn get_resolved(&self) -> Result<Vec<Report>, StorageError> {
        Ok(retain(self.get_all()?, |r| r.resolved))
    }

    fn get_unresolved(&self) -> Result<Vec<Report>, StorageError> {
        Ok(retain(self.get_all()?, |r| !r.resolved))
    }

    fn get_resolved_by_player(&self, player: &str) -> Result<Vec<Report>, StorageError> {
        Ok(retain(self.get_all()?, |r| r.resolved && r.reported_player == player))
    }

    fn get_unresolved_by_player(&self, player: &str) -> Result<Vec<Report>, StorageError> {
        Ok(retain(self.get_all()?, |r| !r.resolved && r.reported_player == player))
    }

    fn count_all(&self) -> Result<usize, StorageError> {
        Ok(self.get_all()?.len())
    }

    fn count_resolved(&self) -> Result<usize, StorageError> {
        Ok(self.get_resolved()?.len())
    }

    fn count_unresolved(&self) -> Result<usize, StorageError> {
        Ok(self.get_unresolved()?.len())
    }

    /// Resolve the most recent report against `player` with `comment`.
    ///
    /// Returns `false` if the player has no report.
    fn resolve_report(&self, player: &str, comment: &str) -> Result<bool, StorageError> {
        match self.get_by_reported_player(player)? {
            Some(mut report) => {
                report.resolve(comment);
                self.update(&report)
            }
            None => Ok(false),
        }
    }
}

fn retain(mut reports: Vec<Report>, keep: impl Fn(&Report) -> bool) -> Vec<Report> {
    reports.retain(|r| keep(r));
    reports
}

/// Append-only, per-report audit trail.
pub trait HistoryStore: Send + Sync {
    /// Append a snapshot of `report` attributed to `updater`, stamped now.
    fn write_to_history(&self, report: &Report, updater: &str) -> Result<(), StorageError>;

    /// All entries for the report, oldest first.
    fn get_history(&self, report_id: &str) -> Result<Vec<HistoryEntry>, StorageError>;

    /// Remove every entry for the report; returns how many were removed.
    /// The primary record is not touched.
    fn clear_history(&self, report_id: &str) -> Result<usize, StorageError>;
}

/// Pick the most recent report, breaking timestamp ties by the larger id.
pub fn most_recent<I>(reports: I) -> Option<Report>
where
    I: IntoIterator<Item = Report>,
{
    reports.into_iter().max_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.report_id.cmp(&b.report_id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: &str, timestamp: i64) -> Report {
        let mut r = Report::with_id(id, "Alice", "Bob", "spam");
        r.timestamp = timestamp;
        r
    }

    #[test]
    fn test_most_recent_prefers_timestamp_then_id() {
        let picked = most_recent(vec![report("a", 10), report("b", 30), report("c", 20)]).unwrap();
        assert_eq!(picked.report_id, "b");
        let picked = most_recent(vec![report("a", 10), report("b", 10)]).unwrap();
        assert_eq!(picked.report_id, "b");
        assert!(most_recent(Vec::new()).is_none());
    }
}
