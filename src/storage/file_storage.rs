use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, error, info, warn};

use crate::configuration::types::FileFormat;
use crate::error_handling::types::StorageError;
use crate::report::{is_valid_report_id, Report};
use crate::storage::storage_trait::{most_recent, HistoryStore, StorageBackend};
use crate::storage::types::{sort_chronologically, HistoryEntry};

const TEMP_PREFIX: &str = ".tmp-";

/// One file per report under `<base>/reports/<report_id>.<ext>`, history
/// under `<base>/reports/history/<report_id>.<ext>`.
///
/// Every write goes to a temporary file in the target directory and is then
/// renamed over the target, so readers never observe a half-written record.
pub struct FileStorage {
    base_path: PathBuf,
    format: FileFormat,
    // serializes read-modify-write of history files within this process
    history_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(base_path: P, format: FileFormat) -> Result<Self, StorageError> {
        let storage = Self {
            base_path: base_path.as_ref().to_path_buf(),
            format,
            history_lock: Mutex::new(()),
        };
        storage.create_dirs()?;
        info!(
            "FileStorage initialized at {} ({:?})",
            storage.reports_dir().display(),
            format
        );
        Ok(storage)
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    fn reports_dir(&self) -> PathBuf {
        self.base_path.join("reports")
    }

    fn history_dir(&self) -> PathBuf {
        self.reports_dir().join("history")
    }

    fn report_path(&self, report_id: &str) -> PathBuf {
        self.reports_dir()
            .join(format!("{}.{}", report_id, self.format.extension()))
    }

    fn history_path(&self, report_id: &str) -> PathBuf {
        self.history_dir()
            .join(format!("{}.{}", report_id, self.format.extension()))
    }

    fn create_dirs(&self) -> Result<(), StorageError> {
        for dir in [self.reports_dir(), self.history_dir()] {
            fs::create_dir_all(&dir).map_err(|e| {
                error!("Failed to create storage dir {}: {}", dir.display(), e);
                StorageError::ConnectionFailed(e.to_string())
            })?;
        }
        Ok(())
    }

    /// Write `contents` to `target` through a temp file and a rename.
    ///
    /// With `create_new` the rename refuses to replace an existing file and
    /// reports `DuplicateReport`. If the filesystem rejects the rename, the
    /// target is written in place instead.
    fn write_atomic(
        &self,
        target: &Path,
        report_id: &str,
        contents: &str,
        create_new: bool,
    ) -> Result<(), StorageError> {
        let dir = target.parent().unwrap_or(self.base_path.as_path());
        let write_failed = |e: std::io::Error| {
            error!("Write failed {}: {}", target.display(), e);
            StorageError::WriteFailed(e.to_string())
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(dir)
            .map_err(write_failed)?;
        tmp.write_all(contents.as_bytes()).map_err(write_failed)?;
        tmp.as_file().sync_all().map_err(write_failed)?;

        let persisted = if create_new {
            tmp.persist_noclobber(target)
        } else {
            tmp.persist(target)
        };
        let err = match persisted {
            Ok(_) => return Ok(()),
            Err(e) => e.error,
        };
        if err.kind() == ErrorKind::AlreadyExists {
            return Err(StorageError::DuplicateReport(report_id.to_string()));
        }

        warn!(
            "Atomic rename into {} failed ({}), falling back to a plain write",
            target.display(),
            err
        );
        let mut file = if create_new {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(target)
                .map_err(|e| match e.kind() {
                    ErrorKind::AlreadyExists => StorageError::DuplicateReport(report_id.to_string()),
                    _ => write_failed(e),
                })?
        } else {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(target)
                .map_err(write_failed)?
        };
        file.write_all(contents.as_bytes()).map_err(write_failed)
    }

    fn read_report(&self, path: &Path) -> Result<Option<Report>, StorageError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match fs::read_to_string(path) {
            Ok(text) => self.format.decode_report(&name, &text).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                error!("Failed to read report file {}: {}", path.display(), e);
                Err(StorageError::ReadFailed(e.to_string()))
            }
        }
    }

    /// Decode every record file; corrupt or unreadable ones are skipped.
    fn scan(&self) -> Result<Vec<Report>, StorageError> {
        let dir = self.reports_dir();
        let entries = fs::read_dir(&dir).map_err(|e| {
            error!("Failed to read reports dir {}: {}", dir.display(), e);
            StorageError::ReadFailed(e.to_string())
        })?;
        let mut reports = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                error!("Dir entry error: {}", e);
                StorageError::ReadFailed(e.to_string())
            })?;
            let path = entry.path();
            let is_record = path.is_file()
                && path.extension().and_then(|s| s.to_str()) == Some(self.format.extension())
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }
            match self.read_report(&path) {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {} // removed since read_dir
                Err(e) => warn!("Skipping report file {}: {}", path.display(), e),
            }
        }
        debug!("Loaded {} report(s) from {}", reports.len(), dir.display());
        Ok(reports)
    }

    fn read_history(&self, report_id: &str) -> Result<Vec<HistoryEntry>, StorageError> {
        let path = self.history_path(report_id);
        match fs::read_to_string(&path) {
            Ok(text) => self.format.decode_history(report_id, &text),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => {
                error!("Failed to read history file {}: {}", path.display(), e);
                Err(StorageError::ReadFailed(e.to_string()))
            }
        }
    }
}

impl StorageBackend for FileStorage {
    fn backend_name(&self) -> &'static str {
        match self.format {
            FileFormat::Structured => "file/structured",
            FileFormat::Lines => "file/lines",
            FileFormat::Hierarchical => "file/hierarchical",
        }
    }

    fn connect(&self) -> Result<(), StorageError> {
        self.create_dirs()
    }

    fn disconnect(&self) {}

    fn insert(&self, report: &Report) -> Result<(), StorageError> {
        report.validate()?;
        let contents = self.format.encode_report(report)?;
        let path = self.report_path(&report.report_id);
        self.write_atomic(&path, &report.report_id, &contents, true)?;
        info!("Saved report {} to {}", report.report_id, path.display());
        Ok(())
    }

    fn get_by_id(&self, report_id: &str) -> Result<Option<Report>, StorageError> {
        if !is_valid_report_id(report_id) {
            return Ok(None);
        }
        let report = self.read_report(&self.report_path(report_id))?;
        match report {
            Some(r) if r.report_id != report_id => Err(StorageError::corrupt(
                report_id,
                format!("file holds report {}", r.report_id),
            )),
            other => Ok(other),
        }
    }

    fn get_by_reported_player(&self, player: &str) -> Result<Option<Report>, StorageError> {
        Ok(most_recent(
            self.scan()?
                .into_iter()
                .filter(|r| r.reported_player == player),
        ))
    }

    fn get_by_reporter(&self, reporter: &str) -> Result<Option<Report>, StorageError> {
        Ok(most_recent(
            self.scan()?.into_iter().filter(|r| r.reporter == reporter),
        ))
    }

    fn get_all(&self) -> Result<Vec<Report>, StorageError> {
        self.scan()
    }

    fn update(&self, report: &Report) -> Result<bool, StorageError> {
        report.validate()?;
        let path = self.report_path(&report.report_id);
        if !path.is_file() {
            warn!("Report {} does not exist; nothing updated", report.report_id);
            return Ok(false);
        }
        let contents = self.format.encode_report(report)?;
        self.write_atomic(&path, &report.report_id, &contents, false)?;
        debug!("Updated report {} in {}", report.report_id, path.display());
        Ok(true)
    }

    fn delete(&self, report_id: &str) -> Result<bool, StorageError> {
        if !is_valid_report_id(report_id) {
            return Ok(false);
        }
        let path = self.report_path(report_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted report {} ({})", report_id, path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => {
                error!("Failed to delete {}: {}", path.display(), e);
                Err(StorageError::WriteFailed(e.to_string()))
            }
        }
    }

    fn exists(&self, report_id: &str) -> Result<bool, StorageError> {
        if !is_valid_report_id(report_id) {
            return Ok(false);
        }
        Ok(self.report_path(report_id).is_file())
    }

    fn count_by_reported_player(&self, player: &str) -> Result<usize, StorageError> {
        Ok(self
            .scan()?
            .iter()
            .filter(|r| r.reported_player == player)
            .count())
    }
}

impl HistoryStore for FileStorage {
    fn write_to_history(&self, report: &Report, updater: &str) -> Result<(), StorageError> {
        report.validate()?;
        let entry = HistoryEntry::new(report, updater);
        let path = self.history_path(&report.report_id);
        let _guard = self.history_lock.lock().unwrap_or_else(|p| p.into_inner());

        if self.format == FileFormat::Lines {
            // one entry per line: a plain append never rewrites earlier entries
            let mut line = self.format.encode_history(std::slice::from_ref(&entry))?;
            let append_failed = |e: std::io::Error| {
                error!("History append failed {}: {}", path.display(), e);
                StorageError::WriteFailed(e.to_string())
            };
            let mut f = OpenOptions::new()
                .read(true)
                .create(true)
                .append(true)
                .open(&path)
                .map_err(append_failed)?;
            // a torn earlier append must not swallow this entry
            if f.metadata().map_err(append_failed)?.len() > 0 {
                let mut last = [0u8; 1];
                f.seek(SeekFrom::End(-1)).map_err(append_failed)?;
                f.read_exact(&mut last).map_err(append_failed)?;
                if last[0] != b'\n' {
                    warn!("History file {} ends in a partial line", path.display());
                    line.insert(0, '\n');
                }
            }
            f.write_all(line.as_bytes()).map_err(append_failed)?;
        } else {
            // an unreadable history file is left alone rather than overwritten
            let mut entries = self.read_history(&report.report_id)?;
            entries.push(entry);
            let contents = self.format.encode_history(&entries)?;
            self.write_atomic(&path, &report.report_id, &contents, false)?;
        }
        debug!(
            "Appended history entry for report {} by {}",
            report.report_id, updater
        );
        Ok(())
    }

    fn get_history(&self, report_id: &str) -> Result<Vec<HistoryEntry>, StorageError> {
        if !is_valid_report_id(report_id) {
            return Ok(Vec::new());
        }
        let mut entries = self.read_history(report_id)?;
        sort_chronologically(&mut entries);
        Ok(entries)
    }

    fn clear_history(&self, report_id: &str) -> Result<usize, StorageError> {
        if !is_valid_report_id(report_id) {
            return Ok(0);
        }
        let _guard = self.history_lock.lock().unwrap_or_else(|p| p.into_inner());
        let removed = match self.read_history(report_id) {
            Ok(entries) => entries.len(),
            Err(e) => {
                warn!("Clearing unreadable history of report {}: {}", report_id, e);
                0
            }
        };
        let path = self.history_path(report_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Cleared {} history entr(ies) for report {}", removed, report_id);
                Ok(removed)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => {
                error!("Failed to delete history file {}: {}", path.display(), e);
                Err(StorageError::WriteFailed(e.to_string()))
            }
        }
    }
}
