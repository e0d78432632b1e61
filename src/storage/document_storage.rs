use std::sync::Mutex;
use std::time::Duration;

use futures::TryStreamExt;
use log::{debug, error, info, warn};
use mongodb::bson::{self, doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};

use crate::configuration::config::StorageConfig;
use crate::error_handling::types::StorageError;
use crate::report::Report;
use crate::storage::storage_trait::{HistoryStore, StorageBackend};
use crate::storage::types::HistoryEntry;

const REPORTS_COLLECTION: &str = "reports";
const HISTORY_COLLECTION: &str = "report_history";
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);
const DUPLICATE_KEY: i32 = 11000;

/// MongoDB backend. Reports are stored as native documents with camelCase
/// field names; the client created by `connect` is the only retained state.
pub struct DocumentStorage {
    rt: tokio::runtime::Runtime,
    uri: String,
    database: String,
    client: Mutex<Option<Client>>,
}

impl DocumentStorage {
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Result<Self, StorageError> {
        // the driver runs connection monitors in the background
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            rt,
            uri: uri.into(),
            database: database.into(),
            client: Mutex::new(None),
        })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        info!(
            "Document storage using database {} at {}:{}",
            config.mongo.database, config.mongo.host, config.mongo.port
        );
        Self::new(config.mongo_uri(), config.mongo.database.clone())
    }

    fn client(&self) -> Result<Client, StorageError> {
        self.client
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(StorageError::NotConnected)
    }

    fn reports(&self) -> Result<Collection<Document>, StorageError> {
        Ok(self
            .client()?
            .database(&self.database)
            .collection(REPORTS_COLLECTION))
    }

    fn history(&self) -> Result<Collection<Document>, StorageError> {
        Ok(self
            .client()?
            .database(&self.database)
            .collection(HISTORY_COLLECTION))
    }

    async fn open(&self) -> Result<Client, StorageError> {
        let mut options = ClientOptions::parse(&self.uri).await.map_err(connection_err)?;
        options.app_name = Some("reportstore".to_string());
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
        let client = Client::with_options(options).map_err(connection_err)?;
        let db = client.database(&self.database);
        db.run_command(doc! { "ping": 1 }).await.map_err(connection_err)?;

        let unique_id = IndexModel::builder()
            .keys(doc! { "reportId": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        db.collection::<Document>(REPORTS_COLLECTION)
            .create_index(unique_id)
            .await
            .map_err(connection_err)?;
        let by_report = IndexModel::builder()
            .keys(doc! { "reportId": 1, "writtenAt": 1 })
            .build();
        db.collection::<Document>(HISTORY_COLLECTION)
            .create_index(by_report)
            .await
            .map_err(connection_err)?;
        Ok(client)
    }

    async fn most_recent(&self, filter: Document) -> Result<Option<Report>, StorageError> {
        let mut cursor = self
            .reports()?
            .find(filter)
            .sort(doc! { "timestamp": -1, "reportId": -1 })
            .await
            .map_err(read_err)?;
        // keep going past corrupt documents
        while let Some(document) = cursor.try_next().await.map_err(read_err)? {
            if let Some(report) = decode(document) {
                return Ok(Some(report));
            }
        }
        Ok(None)
    }
}

fn connection_err(e: mongodb::error::Error) -> StorageError {
    error!("MongoDB connection failed: {}", e);
    StorageError::ConnectionFailed(e.to_string())
}

fn read_err(e: mongodb::error::Error) -> StorageError {
    error!("MongoDB read failed: {}", e);
    StorageError::ReadFailed(e.to_string())
}

fn write_err(e: mongodb::error::Error, report_id: &str) -> StorageError {
    if let ErrorKind::Write(WriteFailure::WriteError(ref failure)) = *e.kind {
        if failure.code == DUPLICATE_KEY {
            return StorageError::DuplicateReport(report_id.to_string());
        }
    }
    error!("MongoDB write failed for report {}: {}", report_id, e);
    StorageError::WriteFailed(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T, report_id: &str) -> Result<Document, StorageError> {
    bson::to_document(value).map_err(|e| {
        error!("Failed to encode report {}: {}", report_id, e);
        StorageError::WriteFailed(e.to_string())
    })
}

fn decode_report(document: Document) -> Result<Report, StorageError> {
    let hint = document
        .get_str("reportId")
        .map(str::to_string)
        .unwrap_or_else(|_| "<unknown>".to_string());
    let report: Report =
        bson::from_document(document).map_err(|e| StorageError::corrupt(&hint, e))?;
    if report.report_id.is_empty() {
        return Err(StorageError::corrupt(hint, "record has no report id"));
    }
    Ok(report)
}

/// Decode a document, logging and dropping it if it is not a valid report.
fn decode(document: Document) -> Option<Report> {
    match decode_report(document) {
        Ok(report) => Some(report),
        Err(e) => {
            warn!("Skipping corrupt report document: {}", e);
            None
        }
    }
}

fn decode_history_entry(report_id: &str, document: Document) -> Option<HistoryEntry> {
    match bson::from_document(document) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!("Skipping corrupt history document of report {}: {}", report_id, e);
            None
        }
    }
}

impl StorageBackend for DocumentStorage {
    fn backend_name(&self) -> &'static str {
        "mongodb"
    }

    fn connect(&self) -> Result<(), StorageError> {
        let mut slot = self.client.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_some() {
            return Ok(());
        }
        let client = self.rt.block_on(self.open())?;
        *slot = Some(client);
        info!("Connected to MongoDB database {}", self.database);
        Ok(())
    }

    fn disconnect(&self) {
        let client = self.client.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(client) = client {
            self.rt.block_on(async { client.shutdown().await });
            info!("Disconnected from MongoDB");
        }
    }

    fn insert(&self, report: &Report) -> Result<(), StorageError> {
        report.validate()?;
        let document = encode(report, &report.report_id)?;
        let reports = self.reports()?;
        self.rt.block_on(async {
            reports
                .insert_one(document)
                .await
                .map_err(|e| write_err(e, &report.report_id))
        })?;
        debug!("Inserted report {}", report.report_id);
        Ok(())
    }

    fn get_by_id(&self, report_id: &str) -> Result<Option<Report>, StorageError> {
        let reports = self.reports()?;
        let found = self.rt.block_on(async {
            reports
                .find_one(doc! { "reportId": report_id })
                .await
                .map_err(read_err)
        })?;
        found.map(decode_report).transpose()
    }

    fn get_by_reported_player(&self, player: &str) -> Result<Option<Report>, StorageError> {
        self.rt
            .block_on(self.most_recent(doc! { "reportedPlayer": player }))
    }

    fn get_by_reporter(&self, reporter: &str) -> Result<Option<Report>, StorageError> {
        self.rt.block_on(self.most_recent(doc! { "reporter": reporter }))
    }

    fn get_all(&self) -> Result<Vec<Report>, StorageError> {
        let reports = self.reports()?;
        let documents: Vec<Document> = self.rt.block_on(async {
            reports
                .find(doc! {})
                .await
                .map_err(read_err)?
                .try_collect()
                .await
                .map_err(read_err)
        })?;
        Ok(documents.into_iter().filter_map(decode).collect())
    }

    fn update(&self, report: &Report) -> Result<bool, StorageError> {
        report.validate()?;
        let document = encode(report, &report.report_id)?;
        let reports = self.reports()?;
        let result = self.rt.block_on(async {
            reports
                .replace_one(doc! { "reportId": report.report_id.as_str() }, document)
                .await
                .map_err(|e| write_err(e, &report.report_id))
        })?;
        if result.matched_count == 0 {
            warn!("Report {} does not exist; nothing updated", report.report_id);
            return Ok(false);
        }
        debug!("Updated report {}", report.report_id);
        Ok(true)
    }

    fn delete(&self, report_id: &str) -> Result<bool, StorageError> {
        let reports = self.reports()?;
        let result = self.rt.block_on(async {
            reports
                .delete_one(doc! { "reportId": report_id })
                .await
                .map_err(|e| write_err(e, report_id))
        })?;
        Ok(result.deleted_count > 0)
    }

    fn exists(&self, report_id: &str) -> Result<bool, StorageError> {
        let reports = self.reports()?;
        let count = self.rt.block_on(async {
            reports
                .count_documents(doc! { "reportId": report_id })
                .await
                .map_err(read_err)
        })?;
        Ok(count > 0)
    }

    fn count_by_reported_player(&self, player: &str) -> Result<usize, StorageError> {
        let reports = self.reports()?;
        let documents: Vec<Document> = self.rt.block_on(async {
            reports
                .find(doc! { "reportedPlayer": player })
                .await
                .map_err(read_err)?
                .try_collect()
                .await
                .map_err(read_err)
        })?;
        Ok(documents.into_iter().filter_map(decode).count())
    }
}

impl HistoryStore for DocumentStorage {
    fn write_to_history(&self, report: &Report, updater: &str) -> Result<(), StorageError> {
        report.validate()?;
        let entry = HistoryEntry::new(report, updater);
        let document = encode(&entry, &report.report_id)?;
        let history = self.history()?;
        self.rt.block_on(async {
            history
                .insert_one(document)
                .await
                .map_err(|e| write_err(e, &report.report_id))
        })?;
        debug!("Appended history entry for report {} by {}", report.report_id, updater);
        Ok(())
    }

    fn get_history(&self, report_id: &str) -> Result<Vec<HistoryEntry>, StorageError> {
        let history = self.history()?;
        let documents: Vec<Document> = self.rt.block_on(async {
            history
                .find(doc! { "reportId": report_id })
                .sort(doc! { "writtenAt": 1, "_id": 1 })
                .await
                .map_err(read_err)?
                .try_collect()
                .await
                .map_err(read_err)
        })?;
        Ok(documents
            .into_iter()
            .filter_map(|d| decode_history_entry(report_id, d))
            .collect())
    }

    fn clear_history(&self, report_id: &str) -> Result<usize, StorageError> {
        let history = self.history()?;
        let result = self.rt.block_on(async {
            history
                .delete_many(doc! { "reportId": report_id })
                .await
                .map_err(|e| write_err(e, report_id))
        })?;
        info!(
            "Cleared {} history entr(ies) for report {}",
            result.deleted_count, report_id
        );
        Ok(result.deleted_count as usize)
    }
}

impl Drop for DocumentStorage {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: &str, player: &str, reporter: &str, timestamp: i64) -> Report {
        let mut r = Report::with_id(id, player, reporter, "spam");
        r.timestamp = timestamp;
        r
    }

    #[test]
    fn test_use_before_connect_is_an_error() {
        let storage = DocumentStorage::new("mongodb://127.0.0.1:1", "reports_test").unwrap();
        assert!(matches!(
            storage.get_by_id("R1"),
            Err(StorageError::NotConnected)
        ));
        assert!(matches!(
            storage.insert(&report("R1", "Alice", "Bob", 1)),
            Err(StorageError::NotConnected)
        ));
        storage.disconnect();
    }

    #[test]
    fn test_decode_skips_documents_without_id() {
        assert!(decode(doc! { "reporter": "Bob" }).is_none());
        assert!(decode(doc! { "reportId": "R1", "timestamp": "yesterday" }).is_none());
        let report = decode(doc! { "reportId": "R1", "reportedPlayer": "Alice", "_id": 7 });
        assert_eq!(report.unwrap().reported_player, "Alice");
    }

    #[test]
    fn test_corrupt_history_document_is_skipped() {
        let r = report("R1", "Alice", "Bob", 5);
        let entry = HistoryEntry::new(&r, "mod_a");
        let good = encode(&entry, "R1").unwrap();
        assert_eq!(decode_history_entry("R1", good), Some(entry));
        assert!(decode_history_entry("R1", doc! { "reportId": "R1", "report": 3 }).is_none());
    }

    #[test]
    fn test_report_document_uses_camel_case_fields() {
        let document = encode(&report("R1", "Alice", "Bob", 5), "R1").unwrap();
        assert_eq!(document.get_str("reportId").unwrap(), "R1");
        assert_eq!(document.get_str("reportedPlayer").unwrap(), "Alice");
        assert_eq!(document.get_i64("timestamp").unwrap(), 5);
    }

    #[test]
    #[ignore = "requires a MongoDB server at REPORTSTORE_MONGO_URI"]
    fn test_mongo_round_trip() {
        let uri = std::env::var("REPORTSTORE_MONGO_URI")
            .unwrap_or_else(|_| "mongodb://127.0.0.1:27017".to_string());
        let storage = DocumentStorage::new(uri, "reportstore_test").unwrap();
        storage.connect().unwrap();
        storage.connect().unwrap();
        for id in ["M1", "M2"] {
            storage.delete(id).unwrap();
            storage.clear_history(id).unwrap();
        }

        let original = report("M1", "Alice", "Bob", 1_000);
        storage.insert(&original).unwrap();
        storage.insert(&report("M2", "Alice", "Carol", 2_000)).unwrap();
        assert!(matches!(
            storage.insert(&original),
            Err(StorageError::DuplicateReport(_))
        ));
        assert_eq!(storage.get_by_id("M1").unwrap(), Some(original.clone()));
        assert_eq!(
            storage.get_by_reported_player("Alice").unwrap().unwrap().report_id,
            "M2"
        );
        assert_eq!(storage.count_by_reported_player("Alice").unwrap(), 2);

        let mut resolved = original.clone();
        resolved.resolve("handled");
        assert!(storage.update(&resolved).unwrap());
        assert!(storage.update(&resolved).unwrap());
        assert!(storage.is_resolved("M1").unwrap());

        storage.write_to_history(&original, "mod").unwrap();
        storage.write_to_history(&resolved, "mod").unwrap();
        let entries = storage.get_history("M1").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[1].report.resolved);
        assert_eq!(storage.clear_history("M1").unwrap(), 2);

        assert!(storage.delete("M1").unwrap());
        assert!(storage.delete("M2").unwrap());
        assert!(!storage.exists("M1").unwrap());
        storage.disconnect();
    }
}
