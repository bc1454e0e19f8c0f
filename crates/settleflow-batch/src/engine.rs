//! The ingestion engine
//!
//! Generic over the fetch and warehouse boundaries so runs are testable
//! with scripted doubles. Error containment boundary: anything that
//! goes wrong inside one window is logged and counted; only setup
//! problems (an inverted interval, an unreachable warehouse at clear
//! time) surface further.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use settleflow_config::WarehouseConfig;
use settleflow_core::catalog::{all_dataset_codes, dataset_spec};
use settleflow_core::window::{TimeWindow, WindowError, WindowIter};
use settleflow_io::dedup::add_dedup_key;
use settleflow_io::normalize::normalize;
use settleflow_providers::WindowFetcher;
use settleflow_warehouse::{
    clear_range, LoadRunner, QuotaMonitor, RetryPolicy, TableRef, ThreadSleeper, Warehouse,
};

/// Source-API provenance tag stamped on every row.
const SOURCE_API: &str = "insights";

/// One ingestion run request.
#[derive(Debug, Clone)]
pub struct IngestPlan {
    /// Inclusive start of the overall interval.
    pub start: DateTime<Utc>,
    /// Exclusive end of the overall interval.
    pub end: DateTime<Utc>,
    /// Restrict the run to these dataset codes; `None` means the whole
    /// catalog.
    pub only: Option<Vec<String>>,
    /// Clear `[start, end)` per dataset before its first window.
    pub overwrite: bool,
    /// Also query datasets presumed offline.
    pub include_offline: bool,
}

/// Setup-time failures; per-window failures never surface here.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Window(#[from] WindowError),
}

/// Per-dataset outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetReport {
    pub code: String,
    pub windows_processed: u32,
    pub windows_failed: u32,
    pub rows_fetched: usize,
    pub rows_loaded: usize,
    pub rows_minimal: usize,
    /// Skipped entirely because the dataset is presumed offline.
    pub skipped_offline: bool,
    /// Overwrite-mode range clear failed; no windows were attempted.
    pub clear_failed: bool,
}

/// Whole-run outcome.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub datasets: Vec<DatasetReport>,
}

impl RunReport {
    pub fn total_rows_loaded(&self) -> usize {
        self.datasets.iter().map(|d| d.rows_loaded).sum()
    }

    pub fn total_windows_failed(&self) -> u32 {
        self.datasets.iter().map(|d| d.windows_failed).sum()
    }
}

/// The pipeline orchestrator.
pub struct IngestEngine<F: WindowFetcher, W: Warehouse> {
    fetcher: F,
    warehouse: W,
    quota: QuotaMonitor,
    config: WarehouseConfig,
}

impl<F: WindowFetcher, W: Warehouse> IngestEngine<F, W> {
    pub fn new(fetcher: F, warehouse: W, config: WarehouseConfig) -> Self {
        let quota = QuotaMonitor::new(config.quota.clone());
        Self {
            fetcher,
            warehouse,
            quota,
            config,
        }
    }

    /// Consume the engine, returning the warehouse (tests use this to
    /// inspect loaded state).
    pub fn into_warehouse(self) -> W {
        self.warehouse
    }

    /// Run the plan to completion and report per-dataset outcomes.
    pub fn run(&mut self, plan: &IngestPlan) -> Result<RunReport, IngestError> {
        let codes: Vec<String> = match &plan.only {
            Some(only) => only.iter().map(|code| code.to_uppercase()).collect(),
            None => all_dataset_codes(),
        };

        info!(
            event_type = "run_start",
            dataset_count = codes.len(),
            from = %plan.start,
            to = %plan.end,
            overwrite = plan.overwrite,
            "Starting ingestion run"
        );

        let mut report = RunReport::default();
        for code in codes {
            report.datasets.push(self.run_dataset(&code, plan)?);
        }

        info!(
            event_type = "run_complete",
            rows_loaded = report.total_rows_loaded(),
            windows_failed = report.total_windows_failed(),
            "Ingestion run complete"
        );
        Ok(report)
    }

    fn run_dataset(&mut self, code: &str, plan: &IngestPlan) -> Result<DatasetReport, IngestError> {
        let spec = dataset_spec(code);
        let mut dataset_report = DatasetReport {
            code: spec.code.clone(),
            ..Default::default()
        };

        if spec.presumed_offline && !plan.include_offline {
            info!(
                event_type = "dataset_skipped_offline",
                dataset = %spec.code,
                "Skipping dataset presumed offline"
            );
            dataset_report.skipped_offline = true;
            return Ok(dataset_report);
        }

        let table = TableRef::new(&self.config.dataset, self.config.table_name(&spec.code));

        if plan.overwrite {
            match clear_range(&self.warehouse, &table, plan.start, plan.end) {
                Ok(_) => {}
                Err(err) => {
                    // Loading into a range we failed to clear would
                    // duplicate rows the caller asked to replace.
                    error!(
                        event_type = "clear_failed",
                        dataset = %spec.code,
                        table = %table,
                        error = %err,
                        "Range clear failed, skipping dataset"
                    );
                    dataset_report.clear_failed = true;
                    return Ok(dataset_report);
                }
            }
        }

        let windows = WindowIter::new(plan.start, plan.end, spec.max_window)?;
        for window in windows {
            match self.process_window(&spec.code, &table, window) {
                Ok(outcome) => {
                    dataset_report.windows_processed += 1;
                    dataset_report.rows_fetched += outcome.rows_fetched;
                    dataset_report.rows_loaded += outcome.rows_loaded;
                    dataset_report.rows_minimal += outcome.rows_minimal;
                    info!(
                        event_type = "window_done",
                        dataset = %spec.code,
                        window = %window,
                        rows_fetched = outcome.rows_fetched,
                        rows_loaded = outcome.rows_loaded,
                        "Window ingested"
                    );
                }
                Err(message) => {
                    dataset_report.windows_processed += 1;
                    dataset_report.windows_failed += 1;
                    warn!(
                        event_type = "window_failed",
                        dataset = %spec.code,
                        window = %window,
                        error = %message,
                        "Window failed, continuing with the next"
                    );
                }
            }
        }

        Ok(dataset_report)
    }

    /// Fetch → normalize → dedup → reconcile → load for one window.
    /// All stage failures collapse into a message for the caller's
    /// containment logging.
    fn process_window(
        &mut self,
        code: &str,
        table: &TableRef,
        window: TimeWindow,
    ) -> Result<WindowOutcome, String> {
        let rows = self
            .fetcher
            .fetch_window(code, window)
            .map_err(|err| format!("fetch: {err}"))?;
        let rows_fetched = rows.len();
        if rows.is_empty() {
            info!(
                event_type = "window_empty",
                dataset = %code,
                window = %window,
                "No rows for window"
            );
            return Ok(WindowOutcome {
                rows_fetched: 0,
                rows_loaded: 0,
                rows_minimal: 0,
            });
        }

        let frame =
            normalize(&rows, code, window, SOURCE_API).map_err(|err| format!("normalize: {err}"))?;
        let frame = add_dedup_key(&frame).map_err(|err| format!("dedup: {err}"))?;

        let existing = match self.warehouse.table_schema(table) {
            Ok(schema) => Some(schema),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(format!("schema read: {err}")),
        };

        let plan = settleflow_warehouse::reconcile(&frame, existing.as_ref())
            .map_err(|err| format!("reconcile: {err}"))?;

        if plan.create {
            self.warehouse
                .create_table(table, &plan.schema)
                .map_err(|err| format!("create table: {err}"))?;
        } else if !plan.migrations.is_empty() {
            self.warehouse
                .apply_migrations(table, &plan.migrations)
                .map_err(|err| format!("schema migration: {err}"))?;
        }

        if let Some(wait) = self
            .quota
            .should_throttle(&self.warehouse)
            .map_err(|err| format!("quota poll: {err}"))?
        {
            info!(
                event_type = "quota_throttle_sleep",
                dataset = %code,
                wait_secs = wait.as_secs_f64(),
                "Throttling before load"
            );
            std::thread::sleep(wait);
        }

        let policy = RetryPolicy::from(&self.config.load_retry);
        let mut runner = LoadRunner::new(&self.warehouse, policy, ThreadSleeper);
        let load_report = runner
            .load(table, &plan.frame, &plan.schema)
            .map_err(|err| format!("load: {err}"))?;

        Ok(WindowOutcome {
            rows_fetched,
            rows_loaded: load_report.rows_loaded,
            rows_minimal: load_report.minimal_fallback_rows,
        })
    }
}

struct WindowOutcome {
    rows_fetched: usize,
    rows_loaded: usize,
    rows_minimal: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use settleflow_config::QuotaConfig;
    use settleflow_providers::{FetchError, RawRow};
    use settleflow_warehouse::LocalWarehouse;
    use std::collections::VecDeque;

    /// Scripted fetcher: one response per fetch call, in order.
    struct ScriptedFetcher {
        script: VecDeque<Result<Vec<RawRow>, FetchError>>,
        calls: Vec<(String, TimeWindow)>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<Vec<RawRow>, FetchError>>) -> Self {
            Self {
                script: script.into_iter().collect(),
                calls: Vec::new(),
            }
        }
    }

    impl WindowFetcher for ScriptedFetcher {
        fn fetch_window(
            &mut self,
            dataset: &str,
            window: TimeWindow,
        ) -> Result<Vec<RawRow>, FetchError> {
            self.calls.push((dataset.to_string(), window));
            self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn rows(values: Vec<serde_json::Value>) -> Vec<RawRow> {
        values
            .into_iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    fn day_rows(day: u32) -> Vec<RawRow> {
        rows(vec![
            json!({"settlementDate": format!("2024-01-0{day}"), "settlementPeriod": 1, "generation": 100.0 * day as f64}),
            json!({"settlementDate": format!("2024-01-0{day}"), "settlementPeriod": 2, "generation": 200.0 * day as f64}),
        ])
    }

    fn plan(start_day: u32, end_day: u32) -> IngestPlan {
        IngestPlan {
            start: Utc.with_ymd_and_hms(2024, 1, start_day, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, end_day, 0, 0, 0).unwrap(),
            only: Some(vec!["BOALF".to_string()]),
            overwrite: false,
            include_offline: false,
        }
    }

    fn engine_with(
        script: Vec<Result<Vec<RawRow>, FetchError>>,
        dir: &tempfile::TempDir,
    ) -> IngestEngine<ScriptedFetcher, LocalWarehouse> {
        let warehouse =
            LocalWarehouse::open(dir.path().join("wh"), QuotaConfig::default()).unwrap();
        IngestEngine::new(
            ScriptedFetcher::new(script),
            warehouse,
            WarehouseConfig::default(),
        )
    }

    #[test]
    fn test_windows_processed_chronologically() {
        // BOALF chunks at one day: 2024-01-01..04 is three windows.
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(
            vec![Ok(day_rows(1)), Ok(day_rows(2)), Ok(day_rows(3))],
            &dir,
        );

        let report = engine.run(&plan(1, 4)).unwrap();
        assert_eq!(report.datasets.len(), 1);
        let ds = &report.datasets[0];
        assert_eq!(ds.windows_processed, 3);
        assert_eq!(ds.windows_failed, 0);
        assert_eq!(ds.rows_fetched, 6);
        assert_eq!(ds.rows_loaded, 6);

        let calls = &engine.fetcher.calls;
        assert_eq!(calls.len(), 3);
        assert!(calls.windows(2).all(|pair| pair[0].1.end == pair[1].1.start));
    }

    #[test]
    fn test_window_failure_does_not_abort_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(
            vec![
                Ok(day_rows(1)),
                Err(FetchError::Transport {
                    dataset: "BOALF".to_string(),
                    message: "connect timeout".to_string(),
                }),
                Ok(day_rows(3)),
            ],
            &dir,
        );

        let report = engine.run(&plan(1, 4)).unwrap();
        let ds = &report.datasets[0];
        assert_eq!(ds.windows_processed, 3);
        assert_eq!(ds.windows_failed, 1);
        assert_eq!(ds.rows_loaded, 4);
    }

    #[test]
    fn test_empty_windows_load_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(vec![Ok(Vec::new()), Ok(Vec::new()), Ok(Vec::new())], &dir);

        let report = engine.run(&plan(1, 4)).unwrap();
        let ds = &report.datasets[0];
        assert_eq!(ds.windows_failed, 0);
        assert_eq!(ds.rows_loaded, 0);

        // No rows ever arrived, so no table was created either.
        let warehouse = engine.into_warehouse();
        let table = TableRef::new("settlement", "raw_boalf");
        assert!(warehouse.table_schema(&table).is_err());
    }

    #[test]
    fn test_offline_dataset_skipped_unless_included() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(vec![Ok(day_rows(1))], &dir);
        let mut p = plan(1, 2);
        p.only = Some(vec!["ABUC".to_string()]);

        let report = engine.run(&p).unwrap();
        assert!(report.datasets[0].skipped_offline);
        assert_eq!(engine.fetcher.calls.len(), 0);

        let mut engine = engine_with(vec![Ok(day_rows(1))], &dir);
        let mut p = plan(1, 2);
        p.only = Some(vec!["ABUC".to_string()]);
        p.include_offline = true;

        let report = engine.run(&p).unwrap();
        assert!(!report.datasets[0].skipped_offline);
        assert_eq!(report.datasets[0].rows_loaded, 2);
    }

    #[test]
    fn test_schema_drift_is_migrated_additively() {
        // Second window carries an extra business column; it projects
        // away. The metadata columns were created with the table on the
        // first window, so nothing is lost.
        let dir = tempfile::tempdir().unwrap();
        let drifted = rows(vec![
            json!({"settlementDate": "2024-01-02", "settlementPeriod": 1, "generation": 1.0, "novelColumn": "x"}),
        ]);
        let mut engine = engine_with(vec![Ok(day_rows(1)), Ok(drifted)], &dir);

        let report = engine.run(&plan(1, 3)).unwrap();
        let ds = &report.datasets[0];
        assert_eq!(ds.windows_failed, 0);
        assert_eq!(ds.rows_loaded, 3);

        let warehouse = engine.into_warehouse();
        let table = TableRef::new("settlement", "raw_boalf");
        let schema = warehouse.table_schema(&table).unwrap();
        assert!(!schema.contains("novelColumn"));
        assert!(schema.contains("_hash_key"));
    }

    #[test]
    fn test_overwrite_clears_before_first_window() {
        let dir = tempfile::tempdir().unwrap();

        // Seed two days of data.
        let mut engine = engine_with(vec![Ok(day_rows(1)), Ok(day_rows(2))], &dir);
        engine.run(&plan(1, 3)).unwrap();
        let warehouse = engine.into_warehouse();
        let table = TableRef::new("settlement", "raw_boalf");
        assert_eq!(warehouse.read_all(&table).unwrap().height(), 4);

        // Re-ingest the same range in overwrite mode; rows are replaced,
        // not duplicated.
        let warehouse2 =
            LocalWarehouse::open(dir.path().join("wh"), QuotaConfig::default()).unwrap();
        let mut engine = IngestEngine::new(
            ScriptedFetcher::new(vec![Ok(day_rows(1)), Ok(day_rows(2))]),
            warehouse2,
            WarehouseConfig::default(),
        );
        let mut p = plan(1, 3);
        p.overwrite = true;
        engine.run(&p).unwrap();

        let warehouse = engine.into_warehouse();
        assert_eq!(warehouse.read_all(&table).unwrap().height(), 4);
    }

    #[test]
    fn test_reingest_same_rows_same_hash_keys() {
        // Append mode duplicates physical rows, but the hash keys
        // collapse them to the same logical rows downstream.
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(vec![Ok(day_rows(1))], &dir);
        engine.run(&plan(1, 2)).unwrap();

        let warehouse =
            LocalWarehouse::open(dir.path().join("wh"), QuotaConfig::default()).unwrap();
        let mut engine = IngestEngine::new(
            ScriptedFetcher::new(vec![Ok(day_rows(1))]),
            warehouse,
            WarehouseConfig::default(),
        );
        engine.run(&plan(1, 2)).unwrap();

        let warehouse = engine.into_warehouse();
        let table = TableRef::new("settlement", "raw_boalf");
        let all = warehouse.read_all(&table).unwrap();
        assert_eq!(all.height(), 4);

        let keys = all.column("_hash_key").unwrap();
        let unique: std::collections::HashSet<_> = keys
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(unique.len(), 2);
    }

    #[test]
    fn test_inverted_interval_is_setup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(vec![], &dir);
        let mut p = plan(1, 2);
        p.start = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        p.end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert!(engine.run(&p).is_err());
    }
}
