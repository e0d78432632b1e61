use env_logger::Env;
use log::{info, warn};
use reportstore::configuration::config::StorageConfig;
use reportstore::configuration::types::{BackendKind, FileFormat, SqlDialect};
use reportstore::report::{Location, Report};
use reportstore::storage::{HistoryStore, StorageBackend, StorageRouter};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

fn main() {
    // Initialize logger (RUST_LOG can override; default to info)
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();

    // Every backend gets its own data dir below this one
    let out_dir: PathBuf = env::var("STORAGE_DEMO_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            env::current_dir()
                .expect("cwd")
                .join("target")
                .join("storage_demo")
        });
    fs::create_dir_all(&out_dir).expect("create output dir");

    let kinds = [
        BackendKind::Relational(SqlDialect::Sqlite),
        BackendKind::File(FileFormat::Structured),
        BackendKind::File(FileFormat::Lines),
        BackendKind::File(FileFormat::Hierarchical),
    ];

    for kind in kinds {
        let data_dir = out_dir.join(kind.to_string().replace('/', "_"));
        let config = StorageConfig::new(kind, &data_dir).with_cache(Duration::from_secs(30));
        let router = StorageRouter::open(&config).expect("open storage");
        info!("== {} at {} ==", kind, data_dir.display());

        // File a report and record its creation
        let report = Report::new("Alice", "Bob", "spam")
            .with_server("lobby", "10.0.0.1:25565", "1.21")
            .with_location(&Location::new("world", 12.5, 64.0, -3.0))
            .with_additional_info("flooded chat for two minutes");
        router.insert(&report).expect("insert report");
        router
            .write_to_history(&report, &report.reporter)
            .expect("write history");

        // A moderator resolves it
        let mut resolved = router
            .get_by_id(&report.report_id)
            .expect("get report")
            .expect("report exists");
        resolved.resolve("muted for 10 minutes");
        if !router.update(&resolved).expect("update report") {
            warn!("Report {} vanished before update", resolved.report_id);
        }
        router
            .write_to_history(&resolved, "moderator")
            .expect("write history");

        let latest = router
            .get_by_reported_player("Alice")
            .expect("lookup by player");
        info!(
            "Latest report against Alice: {:?} (resolved={})",
            latest.as_ref().map(|r| r.report_id.as_str()),
            latest.as_ref().map(|r| r.resolved).unwrap_or(false)
        );
        info!(
            "Alice has {} report(s), {} report(s) stored in total",
            router.count_by_reported_player("Alice").expect("count"),
            router.get_all().expect("get all").len()
        );

        for entry in router.get_history(&report.report_id).expect("history") {
            info!(
                "history: {} at {} resolved={}",
                entry.updater, entry.written_at, entry.report.resolved
            );
        }
        if let Some(stats) = router.cache_stats() {
            info!("cache: {} hit(s), {} miss(es)", stats.hits, stats.misses);
        }

        router.disconnect();
    }

    info!("Demo data left in {}", out_dir.display());
}
