//! Windowed ingestion runner
//!
//! Pulls time-partitioned settlement-market datasets from the upstream
//! API and loads them into the warehouse with content-hash dedup keys.
//! Per-window failures are logged and the run continues; the exit code
//! is non-zero only for unrecoverable setup failures.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{NaiveDate, TimeZone, Utc};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use settleflow_batch::{IngestEngine, IngestPlan};
use settleflow_config::{CliConfigMerge, LogLevel, Settings};
use settleflow_providers::BlockingFetcher;
use settleflow_warehouse::LocalWarehouse;

#[derive(Parser, Debug)]
#[command(
    name = "settleflow-ingest",
    about = "Windowed, idempotent ingestion of settlement-market datasets",
    long_about = "
Iterates datasets × chunked time windows over [--start, --end), fetching
each window through the fallback chain, normalizing the payload,
stamping content-hash dedup keys, and loading into the warehouse.

A failed window is logged and the run continues; exit status is zero on
completion even when some windows failed. Only setup failures (bad
interval, unreachable warehouse) exit non-zero.
"
)]
struct Cli {
    /// First day of the ingestion interval (inclusive), YYYY-MM-DD
    #[arg(long)]
    start: NaiveDate,

    /// Last day of the ingestion interval (exclusive), YYYY-MM-DD
    #[arg(long)]
    end: NaiveDate,

    /// Restrict the run to these dataset codes
    #[arg(long, value_delimiter = ',')]
    only: Option<Vec<String>>,

    /// Clear the destination range per dataset before re-loading it
    #[arg(long)]
    overwrite: bool,

    /// Also query datasets presumed offline
    #[arg(long)]
    include_offline: bool,

    /// BM units to filter on, for datasets that support it
    #[arg(long, value_delimiter = ',')]
    bm_units: Option<Vec<String>>,

    /// Directory for raw-payload debug dumps
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Configuration file path (defaults to ./settleflow.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Warehouse root directory override
    #[arg(long)]
    warehouse_dir: Option<PathBuf>,
}

impl CliConfigMerge for Cli {
    fn merge_into_config(&self, config: &mut Settings) {
        if let Some(level) = self.log_level {
            config.app.log_level = level;
        }
        if let Some(data_dir) = &self.data_dir {
            config.app.data_dir = Some(data_dir.clone());
        }
        if let Some(bm_units) = &self.bm_units {
            config.api.bm_units = bm_units.clone();
        }
        if let Some(warehouse_dir) = &self.warehouse_dir {
            config.warehouse.root_dir = warehouse_dir.clone();
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(event_type = "setup_failed", error = %err, "Ingestion setup failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let settings = match &cli.config {
        Some(path) => Settings::load_from_file(path)?,
        None => Settings::load()?,
    };
    let settings = settings.merge_cli_args(&cli);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.app.log_level.as_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let start = Utc.from_utc_datetime(&cli.start.and_hms_opt(0, 0, 0).expect("midnight exists"));
    let end = Utc.from_utc_datetime(&cli.end.and_hms_opt(0, 0, 0).expect("midnight exists"));

    let fetcher = BlockingFetcher::new(settings.api.clone(), settings.app.data_dir.clone())?;
    let warehouse =
        LocalWarehouse::open(&settings.warehouse.root_dir, settings.warehouse.quota.clone())?;
    let mut engine = IngestEngine::new(fetcher, warehouse, settings.warehouse.clone());

    let plan = IngestPlan {
        start,
        end,
        only: cli.only.clone(),
        overwrite: cli.overwrite,
        include_offline: cli.include_offline,
    };

    let report = engine.run(&plan)?;

    for dataset in &report.datasets {
        if dataset.skipped_offline {
            info!(
                event_type = "summary_dataset",
                dataset = %dataset.code,
                "skipped (presumed offline)"
            );
            continue;
        }
        info!(
            event_type = "summary_dataset",
            dataset = %dataset.code,
            windows = dataset.windows_processed,
            failed = dataset.windows_failed,
            rows_fetched = dataset.rows_fetched,
            rows_loaded = dataset.rows_loaded,
            rows_minimal = dataset.rows_minimal,
            "dataset complete"
        );
    }
    info!(
        event_type = "summary_run",
        rows_loaded = report.total_rows_loaded(),
        windows_failed = report.total_windows_failed(),
        "run complete"
    );

    Ok(())
}
