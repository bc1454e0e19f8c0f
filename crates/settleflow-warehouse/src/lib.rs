//! Warehouse boundary for settleflow
//!
//! The destination warehouse is an external collaborator; this crate
//! owns its interface and everything that guards it:
//!
//! - [`Warehouse`] - the trait the pipeline loads through
//! - `table` - table references, column types, schemas, migrations
//! - `local` - parquet-backed [`LocalWarehouse`] implementation
//! - `reconcile` - pure schema reconciliation plans
//! - `loader` - the resilient load state machine
//! - `quota` - cached usage sampling and throttle advice
//! - `clear` - overwrite-mode range clearing

pub mod clear;
pub mod error;
pub mod loader;
pub mod local;
pub mod quota;
pub mod reconcile;
pub mod table;

pub use clear::clear_range;
pub use error::WarehouseError;
pub use loader::{LoadError, LoadReport, LoadRunner, RetryPolicy, Sleeper, ThreadSleeper};
pub use local::LocalWarehouse;
pub use quota::QuotaMonitor;
pub use reconcile::{reconcile, ReconcilePlan};
pub use table::{ColumnDef, ColumnType, SchemaMigration, TableRef, TableSchema, WriteDisposition};

use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use std::collections::HashMap;

/// Operations the pipeline needs from a destination warehouse.
///
/// Schema updates are additive-only by construction: the only migration
/// operation is adding a nullable column. Implementations must report a
/// missing table through [`WarehouseError::TableNotFound`] so callers
/// can distinguish "create it" from "broken backend".
pub trait Warehouse {
    /// Current schema of a table.
    fn table_schema(&self, table: &TableRef) -> Result<TableSchema, WarehouseError>;

    /// Create a table with the given schema.
    fn create_table(&self, table: &TableRef, schema: &TableSchema) -> Result<(), WarehouseError>;

    /// Apply additive migrations to an existing table.
    fn apply_migrations(
        &self,
        table: &TableRef,
        migrations: &[SchemaMigration],
    ) -> Result<(), WarehouseError>;

    /// Load one frame into a table; returns rows written.
    fn load(
        &self,
        table: &TableRef,
        frame: &DataFrame,
        disposition: WriteDisposition,
    ) -> Result<usize, WarehouseError>;

    /// Delete rows where `column` falls inside `[from, to)`; returns
    /// rows removed.
    fn delete_range(
        &self,
        table: &TableRef,
        column: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<usize, WarehouseError>;

    /// Current usage ratios (metric name → fraction of budget used).
    fn usage_ratios(&self) -> Result<HashMap<String, f64>, WarehouseError>;
}
