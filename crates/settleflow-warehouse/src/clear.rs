//! Overwrite-mode range clearing
//!
//! Before re-loading a date range, the orchestrator deletes existing
//! destination rows inside `[from, to)`. The primary timestamp column
//! is detected by name heuristic first, then by type; with no temporal
//! column at all this no-ops with a warning rather than guessing and
//! deleting against the wrong column.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::WarehouseError;
use crate::table::{ColumnType, TableRef, TableSchema};
use crate::Warehouse;

/// Preferred timestamp column names, checked case-insensitively and in
/// order before falling back to the first timestamp-typed column.
const TIMESTAMP_PREFERENCE: &[&str] = &[
    "settlementdate",
    "starttime",
    "halfhourendtime",
    "measurementtime",
    "publishtime",
    "_window_from",
];

/// Pick the primary timestamp column of a schema, if any.
pub fn primary_timestamp_column(schema: &TableSchema) -> Option<&str> {
    for preferred in TIMESTAMP_PREFERENCE {
        if let Some(def) = schema
            .columns
            .iter()
            .find(|def| def.name.to_lowercase() == *preferred && def.ty == ColumnType::Timestamp)
        {
            return Some(&def.name);
        }
    }
    schema
        .columns
        .iter()
        .find(|def| def.ty == ColumnType::Timestamp)
        .map(|def| def.name.as_str())
}

/// Clear `[from, to)` from a table ahead of an overwrite re-load.
///
/// Returns rows deleted, or `None` when there was nothing to clear (no
/// table yet, or no detectable timestamp column). Delete failures
/// propagate so the caller never loads into a table it wrongly believes
/// cleared.
pub fn clear_range<W: Warehouse>(
    warehouse: &W,
    table: &TableRef,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Option<usize>, WarehouseError> {
    let schema = match warehouse.table_schema(table) {
        Ok(schema) => schema,
        Err(err) if err.is_not_found() => {
            info!(
                event_type = "clear_skipped_no_table",
                table = %table,
                "Table absent, nothing to clear"
            );
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    let Some(column) = primary_timestamp_column(&schema) else {
        warn!(
            event_type = "clear_skipped_no_timestamp",
            table = %table,
            "No timestamp column detected, refusing to guess a delete target"
        );
        return Ok(None);
    };

    let deleted = warehouse.delete_range(table, column, from, to)?;
    info!(
        event_type = "range_cleared",
        table = %table,
        column = %column,
        rows_deleted = deleted,
        from = %from,
        to = %to,
        "Cleared destination range"
    );
    Ok(Some(deleted))
}
