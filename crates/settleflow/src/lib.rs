//! Windowed, idempotent ingestion of settlement-market datasets.
//!
//! This is a meta-crate that re-exports the settleflow sub-crates. New
//! code should depend on specific sub-crates directly:
//!
//! - `settleflow-core` - dataset catalog, time windows, timestamps
//! - `settleflow-config` - layered configuration
//! - `settleflow-providers` - upstream API fetch chain
//! - `settleflow-io` - frame normalization and dedup keys
//! - `settleflow-warehouse` - warehouse boundary, reconciliation, loading
//! - `settleflow-batch` - the ingestion engine
//! - `settleflow-cli` - command-line tools
//!
//! ## Features
//!
//! - `config` / `providers` / `io` / `warehouse` / `batch` - opt into
//!   individual sub-crates
//! - `full` (default) - everything
//!
//! ## Basic Usage
//!
//! ```rust,ignore
//! use settleflow::batch::{IngestEngine, IngestPlan};
//! use settleflow::providers::BlockingFetcher;
//! use settleflow::warehouse::LocalWarehouse;
//!
//! let mut engine = IngestEngine::new(fetcher, warehouse, config);
//! let report = engine.run(&plan)?;
//! println!("loaded {} rows", report.total_rows_loaded());
//! ```

pub use settleflow_core as core;

#[cfg(feature = "config")]
pub use settleflow_config as config;

#[cfg(feature = "providers")]
pub use settleflow_providers as providers;

#[cfg(feature = "io")]
pub use settleflow_io as io;

#[cfg(feature = "warehouse")]
pub use settleflow_warehouse as warehouse;

#[cfg(feature = "batch")]
pub use settleflow_batch as batch;

// Convenience re-exports of the most used types.
pub use settleflow_core::{TimeWindow, WindowIter};

#[cfg(feature = "batch")]
pub use settleflow_batch::{IngestEngine, IngestPlan, RunReport};
