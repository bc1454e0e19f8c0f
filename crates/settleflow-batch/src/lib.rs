//! Ingestion engine for settleflow
//!
//! Orchestrates datasets × time windows through the pipeline:
//! fetch → normalize → dedup → reconcile → load. One window runs to
//! completion before the next begins, windows per dataset process
//! chronologically, and a window's failure is contained and counted
//! rather than aborting the run.

pub mod engine;

pub use engine::{DatasetReport, IngestEngine, IngestError, IngestPlan, RunReport};
