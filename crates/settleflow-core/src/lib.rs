//! Core types for the settleflow ingestion pipeline
//!
//! This crate holds the leaf building blocks shared by every other
//! settleflow crate:
//!
//! - `catalog` - static registry of ingestible dataset codes and their
//!   per-dataset query constraints (chunk rules, offline status)
//! - `window` - half-open time windows and chunked window iteration
//! - `timestamp` - lenient timestamp parsing for upstream payloads

pub mod catalog;
pub mod timestamp;
pub mod window;

pub use catalog::{
    all_dataset_codes, dataset_spec, is_presumed_offline, DatasetSpec, DEFAULT_MAX_WINDOW_DAYS,
    PRESUMED_OFFLINE,
};
pub use timestamp::{format_compact_utc, parse_lenient_utc};
pub use window::{TimeWindow, WindowError, WindowIter};
