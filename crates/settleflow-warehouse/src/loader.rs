//! Resilient warehouse load runner
//!
//! Drives one batch through the load state machine:
//!
//! ```text
//! PENDING -> LOADING -> SUCCEEDED
//!                    -> BACKOFF_RETRY   (quota: sleep, retry, bounded)
//!                    -> SPLIT_RETRY     (deadline: bisect, reload halves)
//!                    -> MINIMAL_FALLBACK (other: metadata-only load)
//!                    -> FAILED
//! ```
//!
//! Splits operate on an explicit stack of `(offset, len)` ranges into
//! the original frame - polars slices are cheap views, so repeated
//! bisection never duplicates row data. Each range loads as an
//! independent transaction: ranges that succeeded stay loaded even when
//! a later range fails.

use polars::prelude::DataFrame;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use settleflow_config::LoadRetryConfig;
use settleflow_io::normalize::{
    META_DATASET, META_HASH_KEY, META_INGESTED_AT, META_SOURCE_API, META_WINDOW_FROM,
    META_WINDOW_TO,
};

use crate::error::WarehouseError;
use crate::table::{TableRef, TableSchema, WriteDisposition};
use crate::Warehouse;

/// Metadata columns eligible for the minimal-fallback load.
const MINIMAL_COLUMNS: &[&str] = &[
    META_DATASET,
    META_WINDOW_FROM,
    META_WINDOW_TO,
    META_INGESTED_AT,
    META_SOURCE_API,
    META_HASH_KEY,
];

/// Terminal load failures.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Quota retries exhausted for one sub-batch.
    #[error("quota retries exhausted after {attempts} attempts loading {table}")]
    RetriesExhausted {
        table: String,
        attempts: u32,
        #[source]
        source: WarehouseError,
    },

    /// A single-row batch still exceeded the deadline; splitting cannot
    /// shrink it further.
    #[error("deadline exceeded on an unsplittable batch for {table}")]
    Timeout {
        table: String,
        #[source]
        source: WarehouseError,
    },

    /// Both the full load and the minimal fallback failed.
    #[error("load failed for {table}")]
    Failed {
        table: String,
        #[source]
        source: WarehouseError,
    },
}

/// Sleep hook so tests can observe backoff without waiting.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Production sleeper: blocks the pipeline thread.
#[derive(Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Quota backoff policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum load attempts per sub-batch.
    pub max_attempts: u32,
    /// Base backoff delay.
    pub backoff_base: Duration,
    /// Cap on any single backoff sleep.
    pub backoff_cap: Duration,
}

impl From<&LoadRetryConfig> for RetryPolicy {
    fn from(config: &LoadRetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_secs(config.backoff_base_secs),
            backoff_cap: Duration::from_secs(config.backoff_cap_secs),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based):
    /// `min(cap, base * 2^(attempt-1) * jitter)` with jitter in [1.0, 1.25].
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.backoff_base.as_secs_f64() * f64::from(1u32 << exponent);
        let jitter = 1.0 + rand::random::<f64>() * 0.25;
        Duration::from_secs_f64((base * jitter).min(self.backoff_cap.as_secs_f64()))
    }
}

/// What one load run accomplished.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Rows written through full-column loads.
    pub rows_loaded: usize,
    /// Rows written through the minimal metadata-only fallback.
    pub minimal_fallback_rows: usize,
    /// Independent sub-batch transactions committed.
    pub sub_batches: u32,
    /// Times the batch was bisected on a deadline signal.
    pub splits: u32,
}

/// The load state machine runner.
pub struct LoadRunner<'w, W: Warehouse, S: Sleeper> {
    warehouse: &'w W,
    policy: RetryPolicy,
    sleeper: S,
}

impl<'w, W: Warehouse, S: Sleeper> LoadRunner<'w, W, S> {
    pub fn new(warehouse: &'w W, policy: RetryPolicy, sleeper: S) -> Self {
        Self {
            warehouse,
            policy,
            sleeper,
        }
    }

    /// Load a frame, bisecting on deadlines and backing off on quota
    /// errors. Empty frames succeed trivially.
    pub fn load(
        &mut self,
        table: &TableRef,
        frame: &DataFrame,
        destination: &TableSchema,
    ) -> Result<LoadReport, LoadError> {
        let mut report = LoadReport::default();
        if frame.height() == 0 || frame.width() == 0 {
            return Ok(report);
        }

        // Explicit range stack; earlier rows load first.
        let mut ranges: Vec<(i64, usize)> = vec![(0, frame.height())];

        while let Some((offset, len)) = ranges.pop() {
            let slice = frame.slice(offset, len);
            match self.load_range(table, &slice, destination, &mut report)? {
                RangeOutcome::Done => {}
                RangeOutcome::Split => {
                    let half = len / 2;
                    report.splits += 1;
                    debug!(
                        event_type = "load_split",
                        table = %table,
                        offset = offset,
                        rows = len,
                        "Deadline exceeded, bisecting batch"
                    );
                    // Push right half first so the left half loads first.
                    ranges.push((offset + half as i64, len - half));
                    ranges.push((offset, half));
                }
            }
        }

        Ok(report)
    }

    fn load_range(
        &mut self,
        table: &TableRef,
        slice: &DataFrame,
        destination: &TableSchema,
        report: &mut LoadReport,
    ) -> Result<RangeOutcome, LoadError> {
        let mut attempt = 1u32;
        loop {
            match self
                .warehouse
                .load(table, slice, WriteDisposition::Append)
            {
                Ok(rows) => {
                    report.rows_loaded += rows;
                    report.sub_batches += 1;
                    return Ok(RangeOutcome::Done);
                }
                Err(err) if err.is_quota() => {
                    if attempt >= self.policy.max_attempts {
                        return Err(LoadError::RetriesExhausted {
                            table: table.to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                    let wait = self.policy.backoff(attempt);
                    warn!(
                        event_type = "load_quota_backoff",
                        table = %table,
                        attempt = attempt,
                        max_attempts = self.policy.max_attempts,
                        wait_secs = wait.as_secs_f64(),
                        error = %err,
                        "Quota exceeded, backing off"
                    );
                    self.sleeper.sleep(wait);
                    attempt += 1;
                }
                Err(err) if err.is_deadline() => {
                    if slice.height() > 1 {
                        return Ok(RangeOutcome::Split);
                    }
                    return Err(LoadError::Timeout {
                        table: table.to_string(),
                        source: err,
                    });
                }
                Err(err) => {
                    return self
                        .minimal_fallback(table, slice, destination, report, err)
                        .map(|_| RangeOutcome::Done);
                }
            }
        }
    }

    /// Last resort: load only the fixed metadata columns present in
    /// both the frame and the destination. Success is partial success,
    /// logged distinctly from a full load.
    fn minimal_fallback(
        &mut self,
        table: &TableRef,
        slice: &DataFrame,
        destination: &TableSchema,
        report: &mut LoadReport,
        cause: WarehouseError,
    ) -> Result<(), LoadError> {
        let columns: Vec<String> = MINIMAL_COLUMNS
            .iter()
            .filter(|name| {
                destination.contains(name)
                    && slice
                        .get_column_names()
                        .iter()
                        .any(|have| have.as_str() == **name)
            })
            .map(|name| name.to_string())
            .collect();

        if columns.is_empty() {
            return Err(LoadError::Failed {
                table: table.to_string(),
                source: cause,
            });
        }

        let minimal = slice.select(columns.clone()).map_err(|err| LoadError::Failed {
            table: table.to_string(),
            source: WarehouseError::Polars(err),
        })?;

        match self
            .warehouse
            .load(table, &minimal, WriteDisposition::Append)
        {
            Ok(rows) => {
                info!(
                    event_type = "load_minimal_fallback",
                    table = %table,
                    rows = rows,
                    columns = ?columns,
                    cause = %cause,
                    "Loaded metadata-only rows after full load failed"
                );
                report.minimal_fallback_rows += rows;
                report.sub_batches += 1;
                Ok(())
            }
            Err(err) => Err(LoadError::Failed {
                table: table.to_string(),
                source: err,
            }),
        }
    }
}

enum RangeOutcome {
    Done,
    Split,
}
