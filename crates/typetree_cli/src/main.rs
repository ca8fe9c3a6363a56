//! Bulk load entry point.
//!
//! # Responsibility
//! - Replace the store content with one JSON document.
//! - Report per-entry failures and turn the outcome into an exit status.
//!
//! Exit status: 0 when every entry loaded, 1 when some entries failed,
//! 2 when the load could not run.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;
use typetree_core::{
    default_log_level, init_process_logging, open_db, BulkDocument, BulkLoader, LoadReport,
    SqliteKindRepository, TreeService,
};

const EXIT_PARTIAL: u8 = 1;
const EXIT_FATAL: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "typetree-load")]
#[command(about = "Replace all enums, types, and instances from a JSON document", version)]
struct Args {
    /// UTF-8 JSON file with `enums`, `types`, and `instances`
    json_path: PathBuf,

    /// SQLite database file
    #[arg(long, env = "TYPETREE_DB", default_value = "typetree.sqlite3")]
    db: PathBuf,

    /// trace|debug|info|warn|error
    #[arg(long, env = "TYPETREE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Directory for rolling log files; stderr when absent
    #[arg(long, env = "TYPETREE_LOG_DIR")]
    log_dir: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(report) => {
            print_summary(&report);
            if report.is_complete() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_PARTIAL)
            }
        }
        Err(err) => {
            error!("event=bulk_load_cli module=cli status=error error={err:#}");
            eprintln!("typetree-load: {err:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn run(args: &Args) -> Result<LoadReport> {
    let level = args.log_level.as_deref().unwrap_or(default_log_level());
    init_process_logging(level, args.log_dir.as_deref())
        .map_err(|err| anyhow!("failed to initialize logging: {err}"))?;

    let document = BulkDocument::from_path(&args.json_path)
        .with_context(|| format!("failed to read `{}`", args.json_path.display()))?;
    let conn = open_db(&args.db)
        .with_context(|| format!("failed to open database `{}`", args.db.display()))?;
    let service = TreeService::new(
        SqliteKindRepository::try_new(&conn).context("database is not a typetree store")?,
    );

    let report = BulkLoader::new(&service)
        .load(&document)
        .context("bulk load aborted")?;
    Ok(report)
}

fn print_summary(report: &LoadReport) {
    println!("wiped {} rows", report.wiped_rows);
    println!(
        "loaded enums={} types={} instances={} rows={}",
        report.enums_loaded, report.types_loaded, report.instances_loaded, report.rows_created
    );
    for failure in &report.failures {
        println!("failed {failure}");
    }
    if !report.is_complete() {
        println!("{} entries failed", report.failures.len());
    }
}
