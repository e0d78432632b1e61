use std::path::PathBuf;
use std::process::exit;

use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use log::{error, info};
use reportstore::configuration::config::Config;
use reportstore::configuration::types::BackendKind;
use reportstore::error_handling::types::StorageError;
use reportstore::report::Report;
use reportstore::storage::{HistoryStore, StorageBackend, StorageRouter};

#[derive(Parser)]
#[command(name = "reportstore")]
#[command(version)]
#[command(about = "Inspect and maintain a report store")]
struct Args {
    config_file: PathBuf,

    /// Override `storage.backend`, e.g. `file/lines` or `relational/sqlite`
    #[arg(long, env = "REPORTSTORE_BACKEND")]
    backend: Option<BackendKind>,

    /// Override `storage.data_dir`
    #[arg(long, env = "REPORTSTORE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the configured backend and report how many records it holds
    Check,
    /// List every report
    List,
    /// Show one report
    Show { report_id: String },
    /// Count reports filed against a player
    Count { player: String },
    /// Show the update history of a report
    History { report_id: String },
    /// Delete the update history of a report
    ClearHistory { report_id: String },
    /// Delete a report (its history is kept)
    Delete { report_id: String },
}

fn format_time(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn print_summary(report: &Report) {
    println!(
        "{}  {}  {} -> {}  [{}]  {}",
        report.report_id,
        format_time(report.timestamp),
        report.reporter,
        report.reported_player,
        if report.resolved { "resolved" } else { "open" },
        report.reason
    );
}

fn run(router: &StorageRouter, command: Command) -> Result<(), StorageError> {
    match command {
        Command::Check => {
            let count = router.get_all()?.len();
            println!("{}: {} report(s)", router.kind(), count);
        }
        Command::List => {
            let mut reports = router.get_all()?;
            reports.sort_by_key(|r| r.timestamp);
            for report in &reports {
                print_summary(report);
            }
        }
        Command::Show { report_id } => match router.get_by_id(&report_id)? {
            Some(report) => println!("{:#?}", report),
            None => println!("No report {}", report_id),
        },
        Command::Count { player } => {
            println!("{}", router.count_by_reported_player(&player)?);
        }
        Command::History { report_id } => {
            for entry in router.get_history(&report_id)? {
                print!("{}  by {:<16} ", format_time(entry.written_at), entry.updater);
                print_summary(&entry.report);
            }
        }
        Command::ClearHistory { report_id } => {
            let removed = router.clear_history(&report_id)?;
            println!("Removed {} history entr(ies)", removed);
        }
        Command::Delete { report_id } => {
            if router.delete(&report_id)? {
                println!("Deleted {}", report_id);
            } else {
                println!("No report {}", report_id);
            }
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    let args = Args::parse();

    info!("Importing configuration");
    let mut config = match Config::from_file(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            error!(
                "Unable to import configuration from {}: {}",
                args.config_file.display(),
                e
            );
            exit(1);
        }
    };
    if let Err(e) = config.apply_overrides(args.backend, args.data_dir) {
        error!("Invalid configuration: {}", e);
        exit(1);
    }

    let router = match StorageRouter::open(&config.storage) {
        Ok(router) => router,
        Err(e) => {
            error!("Unable to connect to {} storage: {}", config.storage.backend, e);
            exit(1);
        }
    };

    let result = run(&router, args.command);
    router.disconnect();
    if let Err(e) = result {
        error!("{}", e);
        exit(1);
    }
}
