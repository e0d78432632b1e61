//! Encoding of report and history files for the file backend.
//!
//! All three formats go through a real serializer so any field content
//! round-trips:
//! - structured: pretty JSON
//! - hierarchical: TOML, history as an array of `[[entries]]` tables
//! - lines: one `key=value` line per field, values written as JSON scalars;
//!   history as one JSON object per line

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::configuration::types::FileFormat;
use crate::error_handling::types::StorageError;
use crate::report::Report;
use crate::storage::types::HistoryEntry;

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryDocument {
    #[serde(default)]
    entries: Vec<HistoryEntry>,
}

fn write_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::WriteFailed(format!("serialization failed: {}", e))
}

fn with_id(report: Report, name: &str) -> Result<Report, StorageError> {
    if report.report_id.is_empty() {
        return Err(StorageError::corrupt(name, "record has no report id"));
    }
    Ok(report)
}

impl FileFormat {
    pub fn encode_report(&self, report: &Report) -> Result<String, StorageError> {
        match self {
            FileFormat::Structured => serde_json::to_string_pretty(report).map_err(write_err),
            FileFormat::Hierarchical => toml::to_string(report).map_err(write_err),
            FileFormat::Lines => {
                let Value::Object(fields) = serde_json::to_value(report).map_err(write_err)? else {
                    return Err(write_err("report did not serialize to an object"));
                };
                let mut out = String::new();
                for (key, value) in fields {
                    out.push_str(&key);
                    out.push('=');
                    out.push_str(&serde_json::to_string(&value).map_err(write_err)?);
                    out.push('\n');
                }
                Ok(out)
            }
        }
    }

    /// `name` identifies the file in errors.
    pub fn decode_report(&self, name: &str, text: &str) -> Result<Report, StorageError> {
        let report = match self {
            FileFormat::Structured => {
                serde_json::from_str(text).map_err(|e| StorageError::corrupt(name, e))?
            }
            FileFormat::Hierarchical => {
                toml::from_str(text).map_err(|e| StorageError::corrupt(name, e))?
            }
            FileFormat::Lines => {
                let mut fields = Map::new();
                for (n, line) in text.lines().enumerate() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    let (key, raw) = line.split_once('=').ok_or_else(|| {
                        StorageError::corrupt(name, format!("line {} has no '='", n + 1))
                    })?;
                    let value: Value = serde_json::from_str(raw).map_err(|e| {
                        StorageError::corrupt(name, format!("line {}: {}", n + 1, e))
                    })?;
                    fields.insert(key.trim().to_string(), value);
                }
                serde_json::from_value(Value::Object(fields))
                    .map_err(|e| StorageError::corrupt(name, e))?
            }
        };
        with_id(report, name)
    }

    pub fn encode_history(&self, entries: &[HistoryEntry]) -> Result<String, StorageError> {
        match self {
            FileFormat::Structured => {
                serde_json::to_string_pretty(&HistoryDocument {
                    entries: entries.to_vec(),
                })
                .map_err(write_err)
            }
            FileFormat::Hierarchical => toml::to_string(&HistoryDocument {
                entries: entries.to_vec(),
            })
            .map_err(write_err),
            FileFormat::Lines => {
                let mut out = String::new();
                for entry in entries {
                    out.push_str(&serde_json::to_string(entry).map_err(write_err)?);
                    out.push('\n');
                }
                Ok(out)
            }
        }
    }

    pub fn decode_history(&self, name: &str, text: &str) -> Result<Vec<HistoryEntry>, StorageError> {
        match self {
            FileFormat::Structured => serde_json::from_str::<HistoryDocument>(text)
                .map(|doc| doc.entries)
                .map_err(|e| StorageError::corrupt(name, e)),
            FileFormat::Hierarchical => toml::from_str::<HistoryDocument>(text)
                .map(|doc| doc.entries)
                .map_err(|e| StorageError::corrupt(name, e)),
            // appends are not atomic, so one bad line must not hide the rest
            FileFormat::Lines => Ok(text
                .lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .filter_map(|(n, line)| match serde_json::from_str(line) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!("Skipping history line {} of {}: {}", n + 1, name, e);
                        None
                    }
                })
                .collect()),
        }
    }
}
