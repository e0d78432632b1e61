use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, error, info, warn};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Schema, SqlErr,
};

use crate::configuration::config::StorageConfig;
use crate::configuration::types::SqlDialect;
use crate::error_handling::types::StorageError;
use crate::report::Report;
use crate::storage::db_entities::{self as reports, history};
use crate::storage::storage_trait::{most_recent, HistoryStore, StorageBackend};
use crate::storage::types::HistoryEntry;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Relational backend for MySQL, PostgreSQL and SQLite.
///
/// Every call opens a fresh connection, runs its statements and closes the
/// connection again; nothing is pooled between calls.
pub struct DatabaseStorage {
    rt: tokio::runtime::Runtime,
    url: String,
    dialect: SqlDialect,
}

impl DatabaseStorage {
    pub fn new(url: impl Into<String>, dialect: SqlDialect) -> Result<Self, StorageError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            rt,
            url: url.into(),
            dialect,
        })
    }

    /// Open (creating if missing) an SQLite database file.
    pub fn new_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                error!("Failed to create database dir {}: {}", parent.display(), e);
                StorageError::WriteFailed(e.to_string())
            })?;
        }
        Self::new(
            format!("sqlite://{}?mode=rwc", path.display()),
            SqlDialect::Sqlite,
        )
    }

    pub fn from_config(config: &StorageConfig, dialect: SqlDialect) -> Result<Self, StorageError> {
        match dialect {
            SqlDialect::Sqlite | SqlDialect::H2 if config.sql.url.is_none() => {
                if dialect == SqlDialect::H2 {
                    warn!("H2 has no native driver; using an embedded SQLite file instead");
                }
                let path = config.sqlite_file();
                info!("Relational storage using database file {}", path.display());
                let mut storage = Self::new_file(path)?;
                storage.dialect = dialect;
                Ok(storage)
            }
            _ => {
                info!("Relational storage using {:?} dialect", dialect);
                Self::new(config.sql_url(dialect), dialect)
            }
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    async fn open(&self) -> Result<DatabaseConnection, StorageError> {
        let mut opts = ConnectOptions::new(self.url.clone());
        opts.max_connections(1)
            .min_connections(0)
            .connect_timeout(CONNECT_TIMEOUT)
            .acquire_timeout(CONNECT_TIMEOUT)
            .sqlx_logging(false);
        Database::connect(opts).await.map_err(|e| {
            error!("Failed to connect to {:?} database: {}", self.dialect, e);
            StorageError::ConnectionFailed(e.to_string())
        })
    }
}

async fn release(db: DatabaseConnection) {
    if let Err(e) = db.close().await {
        warn!("Failed to close database connection: {}", e);
    }
}

async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    let mut reports_table = schema.create_table_from_entity(reports::Entity);
    reports_table.if_not_exists();
    db.execute(backend.build(&reports_table)).await?;
    let mut history_table = schema.create_table_from_entity(history::Entity);
    history_table.if_not_exists();
    db.execute(backend.build(&history_table)).await?;
    Ok(())
}

fn read_err(e: DbErr) -> StorageError {
    error!("Database read failed: {}", e);
    match e {
        DbErr::Conn(_) => StorageError::ConnectionFailed(e.to_string()),
        _ => StorageError::ReadFailed(e.to_string()),
    }
}

fn write_err(e: DbErr, report_id: &str) -> StorageError {
    if let Some(SqlErr::UniqueConstraintViolation(_)) = e.sql_err() {
        return StorageError::DuplicateReport(report_id.to_string());
    }
    error!("Database write failed for report {}: {}", report_id, e);
    match e {
        DbErr::Conn(_) => StorageError::ConnectionFailed(e.to_string()),
        _ => StorageError::WriteFailed(e.to_string()),
    }
}

/// Decode rows, dropping the ones whose `data` column is not a valid report.
fn decode_rows(rows: Vec<reports::Model>) -> Vec<Report> {
    rows.into_iter()
        .filter_map(|row| match Report::from_json(&row.report_id, &row.data) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Skipping corrupt report row: {}", e);
                None
            }
        })
        .collect()
}

impl StorageBackend for DatabaseStorage {
    fn backend_name(&self) -> &'static str {
        match self.dialect {
            SqlDialect::MySql => "mysql",
            SqlDialect::Postgres => "postgresql",
            SqlDialect::Sqlite => "sqlite",
            SqlDialect::H2 => "h2",
        }
    }

    fn connect(&self) -> Result<(), StorageError> {
        self.rt.block_on(async {
            let db = self.open().await?;
            let created = create_tables(&db).await;
            release(db).await;
            created.map_err(|e| {
                error!("Failed to create report tables: {}", e);
                StorageError::ConnectionFailed(e.to_string())
            })?;
            info!("Connected to {} storage", self.backend_name());
            Ok(())
        })
    }

    fn disconnect(&self) {
        // connections never outlive a call
        debug!("Disconnected from {} storage", self.backend_name());
    }

    fn insert(&self, report: &Report) -> Result<(), StorageError> {
        report.validate()?;
        let json = report.to_json()?;
        self.rt.block_on(async {
            let db = self.open().await?;
            let existing = reports::Entity::find_by_id(report.report_id.clone())
                .count(&db)
                .await;
            let result = match existing {
                Ok(0) => {
                    let model = reports::ActiveModel {
                        report_id: Set(report.report_id.clone()),
                        reported_player: Set(report.reported_player.clone()),
                        reporter: Set(report.reporter.clone()),
                        data: Set(json),
                    };
                    reports::Entity::insert(model)
                        .exec_without_returning(&db)
                        .await
                        .map(|_| ())
                        .map_err(|e| write_err(e, &report.report_id))
                }
                Ok(_) => Err(StorageError::DuplicateReport(report.report_id.clone())),
                Err(e) => Err(read_err(e)),
            };
            release(db).await;
            if result.is_ok() {
                debug!("Inserted report {}", report.report_id);
            }
            result
        })
    }

    fn get_by_id(&self, report_id: &str) -> Result<Option<Report>, StorageError> {
        self.rt.block_on(async {
            let db = self.open().await?;
            let row = reports::Entity::find_by_id(report_id.to_owned())
                .one(&db)
                .await;
            release(db).await;
            row.map_err(read_err)?
                .map(|m| Report::from_json(&m.report_id, &m.data))
                .transpose()
        })
    }

    fn get_by_reported_player(&self, player: &str) -> Result<Option<Report>, StorageError> {
        self.rt.block_on(async {
            let db = self.open().await?;
            let rows = reports::Entity::find()
                .filter(reports::Column::ReportedPlayer.eq(player))
                .all(&db)
                .await;
            release(db).await;
            Ok(most_recent(decode_rows(rows.map_err(read_err)?)))
        })
    }

    fn get_by_reporter(&self, reporter: &str) -> Result<Option<Report>, StorageError> {
        self.rt.block_on(async {
            let db = self.open().await?;
            let rows = reports::Entity::find()
                .filter(reports::Column::Reporter.eq(reporter))
                .all(&db)
                .await;
            release(db).await;
            Ok(most_recent(decode_rows(rows.map_err(read_err)?)))
        })
    }

    fn get_all(&self) -> Result<Vec<Report>, StorageError> {
        self.rt.block_on(async {
            let db = self.open().await?;
            let rows = reports::Entity::find().all(&db).await;
            release(db).await;
            let rows = rows.map_err(read_err)?;
            let total = rows.len();
            let reports = decode_rows(rows);
            debug!("Loaded {} of {} report row(s)", reports.len(), total);
            Ok(reports)
        })
    }

    fn update(&self, report: &Report) -> Result<bool, StorageError> {
        report.validate()?;
        let json = report.to_json()?;
        self.rt.block_on(async {
            let db = self.open().await?;
            let updated = reports::Entity::update_many()
                .col_expr(
                    reports::Column::ReportedPlayer,
                    Expr::value(report.reported_player.clone()),
                )
                .col_expr(reports::Column::Reporter, Expr::value(report.reporter.clone()))
                .col_expr(reports::Column::Data, Expr::value(json))
                .filter(reports::Column::ReportId.eq(report.report_id.as_str()))
                .exec(&db)
                .await;
            let result = match updated {
                Ok(res) if res.rows_affected > 0 => Ok(true),
                // MySQL reports 0 affected rows when nothing changed
                Ok(_) => reports::Entity::find_by_id(report.report_id.clone())
                    .count(&db)
                    .await
                    .map(|n| n > 0)
                    .map_err(read_err),
                Err(e) => Err(write_err(e, &report.report_id)),
            };
            release(db).await;
            if let Ok(false) = result {
                warn!("Report {} does not exist; nothing updated", report.report_id);
            }
            result
        })
    }

    fn delete(&self, report_id: &str) -> Result<bool, StorageError> {
        self.rt.block_on(async {
            let db = self.open().await?;
            let deleted = reports::Entity::delete_by_id(report_id.to_owned())
                .exec(&db)
                .await;
            release(db).await;
            let removed = deleted.map_err(|e| write_err(e, report_id))?.rows_affected > 0;
            if removed {
                debug!("Deleted report {}", report_id);
            }
            Ok(removed)
        })
    }

    fn exists(&self, report_id: &str) -> Result<bool, StorageError> {
        self.rt.block_on(async {
            let db = self.open().await?;
            let count = reports::Entity::find_by_id(report_id.to_owned())
                .count(&db)
                .await;
            release(db).await;
            Ok(count.map_err(read_err)? > 0)
        })
    }

    fn count_by_reported_player(&self, player: &str) -> Result<usize, StorageError> {
        self.rt.block_on(async {
            let db = self.open().await?;
            // only decodable rows count, as in get_all
            let rows = reports::Entity::find()
                .filter(reports::Column::ReportedPlayer.eq(player))
                .all(&db)
                .await;
            release(db).await;
            Ok(decode_rows(rows.map_err(read_err)?).len())
        })
    }
}

impl HistoryStore for DatabaseStorage {
    fn write_to_history(&self, report: &Report, updater: &str) -> Result<(), StorageError> {
        report.validate()?;
        let entry = HistoryEntry::new(report, updater);
        let json = report.to_json()?;
        self.rt.block_on(async {
            let db = self.open().await?;
            let model = history::ActiveModel {
                id: NotSet,
                report_id: Set(entry.report_id.clone()),
                updater: Set(entry.updater.clone()),
                written_at: Set(entry.written_at),
                data: Set(json),
            };
            let inserted = history::Entity::insert(model)
                .exec_without_returning(&db)
                .await;
            release(db).await;
            inserted.map_err(|e| write_err(e, &entry.report_id))?;
            debug!(
                "Recorded history for report {} by {}",
                entry.report_id, entry.updater
            );
            Ok(())
        })
    }

    fn get_history(&self, report_id: &str) -> Result<Vec<HistoryEntry>, StorageError> {
        self.rt.block_on(async {
            let db = self.open().await?;
            let rows = history::Entity::find()
                .filter(history::Column::ReportId.eq(report_id))
                .order_by_asc(history::Column::WrittenAt)
                .order_by_asc(history::Column::Id)
                .all(&db)
                .await;
            release(db).await;
            let entries = rows
                .map_err(read_err)?
                .into_iter()
                .filter_map(|row| match Report::from_json(&row.report_id, &row.data) {
                    Ok(report) => Some(HistoryEntry {
                        report_id: row.report_id,
                        updater: row.updater,
                        written_at: row.written_at,
                        report,
                    }),
                    Err(e) => {
                        warn!("Skipping corrupt history row {}: {}", row.id, e);
                        None
                    }
                })
                .collect();
            Ok(entries)
        })
    }

    fn clear_history(&self, report_id: &str) -> Result<usize, StorageError> {
        self.rt.block_on(async {
            let db = self.open().await?;
            let deleted = history::Entity::delete_many()
                .filter(history::Column::ReportId.eq(report_id))
                .exec(&db)
                .await;
            release(db).await;
            let removed = deleted.map_err(|e| write_err(e, report_id))?.rows_affected as usize;
            info!("Cleared {} history entr(ies) for report {}", removed, report_id);
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn temp_db() -> (TempDir, DatabaseStorage) {
        let dir = TempDir::new().unwrap();
        let path: PathBuf = dir.path().join("reports.db");
        let storage = DatabaseStorage::new_file(path).unwrap();
        storage.connect().unwrap();
        (dir, storage)
    }

    fn report(id: &str, player: &str, reporter: &str, timestamp: i64) -> Report {
        let mut r = Report::with_id(id, player, reporter, "spam")
            .with_server("lobby", "10.0.0.1:25565", "1.21");
        r.timestamp = timestamp;
        r
    }

    #[test]
    fn test_db_round_trip_and_lifecycle() {
        let (_dir, storage) = temp_db();
        let original = report("R1", "Alice", "Bob", 1_000);
        storage.insert(&original).unwrap();
        assert_eq!(storage.get_by_id("R1").unwrap(), Some(original.clone()));

        let mut resolved = original.clone();
        resolved.resolve("handled");
        assert!(storage.update(&resolved).unwrap());
        assert!(storage.update(&resolved).unwrap());
        assert!(storage.is_resolved("R1").unwrap());
        assert_eq!(storage.count_by_reported_player("Alice").unwrap(), 1);

        assert!(storage.delete("R1").unwrap());
        assert!(!storage.exists("R1").unwrap());
        assert!(!storage.delete("R1").unwrap());
        assert_eq!(storage.get_by_id("R1").unwrap(), None);
    }

    #[test]
    fn test_db_duplicate_insert_keeps_original() {
        let (_dir, storage) = temp_db();
        let original = report("R1", "Alice", "Bob", 1_000);
        storage.insert(&original).unwrap();
        let clash = report("R1", "Mallory", "Eve", 2_000);
        assert!(matches!(
            storage.insert(&clash),
            Err(StorageError::DuplicateReport(_))
        ));
        assert_eq!(storage.get_by_id("R1").unwrap(), Some(original));
    }

    #[test]
    fn test_db_update_missing_returns_false() {
        let (_dir, storage) = temp_db();
        assert!(!storage.update(&report("ghost", "Alice", "Bob", 1)).unwrap());
        assert!(storage.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_db_lookups_return_most_recent() {
        let (_dir, storage) = temp_db();
        storage.insert(&report("old", "Alice", "Bob", 1_000)).unwrap();
        storage.insert(&report("new", "Alice", "Carol", 3_000)).unwrap();
        storage.insert(&report("mid", "Dave", "Bob", 2_000)).unwrap();

        let by_player = storage.get_by_reported_player("Alice").unwrap().unwrap();
        assert_eq!(by_player.report_id, "new");
        let by_reporter = storage.get_by_reporter("Bob").unwrap().unwrap();
        assert_eq!(by_reporter.report_id, "mid");
        assert!(storage.get_by_reporter("Nobody").unwrap().is_none());
        assert_eq!(storage.get_all().unwrap().len(), 3);
        assert!(storage.player_has_report("Dave").unwrap());
        assert!(!storage.player_has_report("Eve").unwrap());
    }

    #[test]
    fn test_db_corrupt_row_is_skipped() {
        let (_dir, storage) = temp_db();
        storage.insert(&report("good", "Alice", "Bob", 1)).unwrap();
        storage.rt.block_on(async {
            let db = storage.open().await.unwrap();
            let model = reports::ActiveModel {
                report_id: Set("bad".into()),
                reported_player: Set("Alice".into()),
                reporter: Set("Bob".into()),
                data: Set("{not json".into()),
            };
            reports::Entity::insert(model)
                .exec_without_returning(&db)
                .await
                .unwrap();
            release(db).await;
        });
        let all = storage.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].report_id, "good");
        assert!(matches!(
            storage.get_by_id("bad"),
            Err(StorageError::CorruptRecord { .. })
        ));
        assert_eq!(storage.count_by_reported_player("Alice").unwrap(), 1);
        assert!(storage.player_has_report("Alice").unwrap());
    }

    #[test]
    fn test_db_history_append_and_clear() {
        let (_dir, storage) = temp_db();
        let mut r = report("R1", "Alice", "Bob", 1_000);
        storage.insert(&r).unwrap();
        storage.write_to_history(&r, "mod_a").unwrap();
        r.resolve("done");
        storage.write_to_history(&r, "mod_a").unwrap();
        storage.write_to_history(&r, "mod_b").unwrap();

        let entries = storage.get_history("R1").unwrap();
        assert_eq!(entries.len(), 3);
        assert!(!entries[0].report.resolved);
        assert!(entries[1].report.resolved);
        assert_eq!(entries[2].updater, "mod_b");
        assert!(entries.windows(2).all(|w| w[0].written_at <= w[1].written_at));

        assert!(storage.delete("R1").unwrap());
        assert_eq!(storage.get_history("R1").unwrap().len(), 3);
        assert_eq!(storage.clear_history("R1").unwrap(), 3);
        assert!(storage.get_history("R1").unwrap().is_empty());
    }

    #[test]
    fn test_connect_is_idempotent() {
        let (_dir, storage) = temp_db();
        storage.connect().unwrap();
        storage.insert(&report("R1", "Alice", "Bob", 1)).unwrap();
        storage.connect().unwrap();
        storage.disconnect();
        storage.disconnect();
        assert!(storage.exists("R1").unwrap());
    }

    #[test]
    fn test_unreachable_database_fails_connect() {
        let storage = DatabaseStorage::new(
            "postgres://nobody@127.0.0.1:1/reports",
            SqlDialect::Postgres,
        )
        .unwrap();
        let err = storage.connect().unwrap_err();
        assert!(err.is_connection());
    }

    #[test]
    #[ignore = "requires a MySQL server in REPORTSTORE_MYSQL_URL"]
    fn test_mysql_scenario() {
        let Ok(url) = std::env::var("REPORTSTORE_MYSQL_URL") else {
            return;
        };
        let storage = DatabaseStorage::new(url, SqlDialect::MySql).unwrap();
        storage.connect().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let mut r = report(&id, "Alice", "Bob", 1);
        storage.insert(&r).unwrap();
        r.resolve("handled");
        assert!(storage.update(&r).unwrap());
        assert!(storage.update(&r).unwrap());
        assert!(storage.get_by_id(&id).unwrap().unwrap().resolved);
        assert!(storage.delete(&id).unwrap());
    }

    #[test]
    #[ignore = "requires a PostgreSQL server in REPORTSTORE_POSTGRES_URL"]
    fn test_postgres_scenario() {
        let Ok(url) = std::env::var("REPORTSTORE_POSTGRES_URL") else {
            return;
        };
        let storage = DatabaseStorage::new(url, SqlDialect::Postgres).unwrap();
        storage.connect().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let r = report(&id, "Alice", "Bob", 1);
        storage.insert(&r).unwrap();
        assert!(matches!(
            storage.insert(&r),
            Err(StorageError::DuplicateReport(_))
        ));
        assert!(storage.delete(&id).unwrap());
    }
}
