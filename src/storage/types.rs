use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::report::Report;

/// One snapshot in a report's update history.
///
/// Entries are keyed by `(updater, written_at)` and never modified once
/// written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub report_id: String,
    pub updater: String,
    /// Write time in epoch milliseconds.
    pub written_at: i64,
    pub report: Report,
}

impl HistoryEntry {
    pub fn new(report: &Report, updater: &str) -> Self {
        Self {
            report_id: report.report_id.clone(),
            updater: updater.to_string(),
            written_at: Utc::now().timestamp_millis(),
            report: report.clone(),
        }
    }

    pub fn key(&self) -> (&str, i64) {
        (&self.updater, self.written_at)
    }
}

/// Sort entries chronologically, keeping insertion order for equal times.
pub fn sort_chronologically(entries: &mut [HistoryEntry]) {
    entries.sort_by_key(|e| e.written_at);
}
