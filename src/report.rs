//! The report value object and its location helper.
//!
//! A `Report` is stored as a full snapshot by every backend. The serialized
//! form uses camelCase field names and every field has a default, so records
//! written by older builds (with fewer fields) still decode.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_handling::types::StorageError;

/// One reported incident between two identities.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Report {
    pub report_id: String,
    pub reported_player: String,
    pub reporter: String,
    pub reason: String,
    /// Creation time in epoch milliseconds; never changed after creation.
    pub timestamp: i64,
    pub resolved: bool,
    pub resolution_comment: String,
    pub server_name: String,
    pub server_address: String,
    pub server_version: String,
    pub world_name: String,
    /// `world,x,y,z`, see [`Location`].
    pub location: String,
    pub additional_info: String,
}

fn report_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9_.-]*$").expect("valid regex"))
}

/// Whether `id` is usable as a report id (and therefore as a file name).
pub fn is_valid_report_id(id: &str) -> bool {
    report_id_pattern().is_match(id)
}

impl Report {
    /// Create a new unresolved report with a fresh id and the current time.
    pub fn new(
        reported_player: impl Into<String>,
        reporter: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), reported_player, reporter, reason)
    }

    /// Same as [`Report::new`] with a caller-chosen id.
    pub fn with_id(
        report_id: impl Into<String>,
        reported_player: impl Into<String>,
        reporter: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            report_id: report_id.into(),
            reported_player: reported_player.into(),
            reporter: reporter.into(),
            reason: reason.into(),
            timestamp: Utc::now().timestamp_millis(),
            ..Default::default()
        }
    }

    pub fn with_server(
        mut self,
        name: impl Into<String>,
        address: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        self.server_name = name.into();
        self.server_address = address.into();
        self.server_version = version.into();
        self
    }

    /// Sets both `world_name` and `location` from a parsed location.
    pub fn with_location(mut self, location: &Location) -> Self {
        self.world_name = location.world.clone();
        self.location = location.to_string();
        self
    }

    pub fn with_additional_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info = info.into();
        self
    }

    pub fn resolve(&mut self, comment: impl Into<String>) {
        self.resolved = true;
        self.resolution_comment = comment.into();
    }

    pub fn reopen(&mut self) {
        self.resolved = false;
    }

    pub fn parsed_location(&self) -> Option<Location> {
        self.location.parse().ok()
    }

    /// Check that the report can be persisted by any backend.
    ///
    /// The id doubles as a file name in the file backend, so path separators
    /// and leading dots are rejected everywhere.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.report_id.is_empty() {
            return Err(StorageError::InvalidReport("report id is empty".into()));
        }
        if !report_id_pattern().is_match(&self.report_id) {
            return Err(StorageError::InvalidReport(format!(
                "report id {:?} contains unsupported characters",
                self.report_id
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, StorageError> {
        serde_json::to_string(self).map_err(|e| StorageError::WriteFailed(e.to_string()))
    }

    pub fn from_json(id_hint: &str, json: &str) -> Result<Self, StorageError> {
        let report: Report =
            serde_json::from_str(json).map_err(|e| StorageError::corrupt(id_hint, e))?;
        if report.report_id.is_empty() {
            return Err(StorageError::corrupt(id_hint, "record has no report id"));
        }
        Ok(report)
    }
}

/// A world name plus coordinates, serialized as `world,x,y,z`.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{:?},{:?},{:?}", self.world, self.x, self.y, self.z)
    }
}

impl FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();
        if parts.len() != 4 || parts[0].is_empty() {
            return Err(format!("invalid location format: {}", s));
        }
        let coord = |p: &str| {
            p.parse::<f64>()
                .map_err(|e| format!("invalid coordinate {:?}: {}", p, e))
        };
        Ok(Location {
            world: parts[0].to_string(),
            x: coord(parts[1])?,
            y: coord(parts[2])?,
            z: coord(parts[3])?,
        })
    }
}
