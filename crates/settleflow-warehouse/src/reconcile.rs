//! Schema reconciliation
//!
//! Pure planning: given an incoming frame and the destination's current
//! schema, produce a castable frame, the desired schema, and the list
//! of additive migrations to apply - without touching the warehouse.
//! The caller applies migrations, then loads the frame.
//!
//! Resolution order for drifted columns, safest first:
//! 1. project to the common column set
//! 2. additively migrate recognized metadata columns in (nullable)
//! 3. cast kept values to the destination's declared types
//! 4. downgrade an uncastable column to string
//! 5. drop the column from this batch only
//!
//! Existing destination columns are never dropped or retyped.

use polars::prelude::*;
use tracing::warn;

use settleflow_core::timestamp::parse_lenient_utc;
use settleflow_io::normalize::METADATA_COLUMNS;

use crate::error::WarehouseError;
use crate::table::{ColumnDef, ColumnType, SchemaMigration, TableSchema};

/// Outcome of reconciling one frame against one destination.
#[derive(Debug)]
pub struct ReconcilePlan {
    /// Frame projected and cast to the destination types.
    pub frame: DataFrame,
    /// Desired destination schema after applying `migrations`.
    pub schema: TableSchema,
    /// Additive migrations the caller must apply before loading.
    pub migrations: Vec<SchemaMigration>,
    /// Whether the destination table must be created first.
    pub create: bool,
    /// Columns dropped from this batch because no cast succeeded.
    pub dropped: Vec<String>,
}

/// Reconcile a frame against the destination's current schema.
///
/// `existing = None` means the table is absent and the incoming columns
/// become the schema to create.
pub fn reconcile(
    frame: &DataFrame,
    existing: Option<&TableSchema>,
) -> Result<ReconcilePlan, WarehouseError> {
    let Some(destination) = existing else {
        return Ok(ReconcilePlan {
            frame: frame.clone(),
            schema: TableSchema::from_frame(frame),
            migrations: Vec::new(),
            create: true,
            dropped: Vec::new(),
        });
    };

    let incoming: Vec<String> = frame
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    // Extra incoming columns in the extended-metadata allow-list are
    // additively migrated in; anything else is projected away.
    let mut migrations = Vec::new();
    let mut desired = destination.clone();
    for name in &incoming {
        if destination.contains(name) {
            continue;
        }
        if METADATA_COLUMNS.contains(&name.as_str()) {
            let ty = ColumnType::from_polars(frame.column(name.as_str())?.dtype());
            migrations.push(SchemaMigration::AddColumn {
                name: name.clone(),
                ty,
            });
            desired.columns.push(ColumnDef {
                name: name.clone(),
                ty,
            });
        }
    }

    let mut kept: Vec<Column> = Vec::new();
    let mut dropped: Vec<String> = Vec::new();
    for def in &desired.columns {
        if !incoming.contains(&def.name) {
            continue;
        }
        let column = frame.column(def.name.as_str())?;
        match cast_column(column, def.ty) {
            Ok(cast) => kept.push(cast),
            // Last resort before dropping: downgrade the values to their
            // string rendition and parse that into the destination type.
            Err(()) => match cast_column(column, ColumnType::String)
                .and_then(|text| cast_column(&text, def.ty))
            {
                Ok(cast) => {
                    warn!(
                        event_type = "column_downgraded",
                        column = %def.name,
                        target_type = %def.ty,
                        "Direct cast failed, recovered via string rendition"
                    );
                    kept.push(cast);
                }
                Err(()) => {
                    warn!(
                        event_type = "column_dropped",
                        column = %def.name,
                        "No cast succeeded, dropping column from this batch"
                    );
                    dropped.push(def.name.clone());
                }
            },
        }
    }

    Ok(ReconcilePlan {
        frame: DataFrame::new(kept)?,
        schema: desired,
        migrations,
        create: false,
        dropped,
    })
}

/// Cast one column to a destination type, value by value.
///
/// Unconvertible values become null. The cast as a whole fails only
/// when the column had non-null input and nothing survived, which is
/// the signal for the string-downgrade ladder.
fn cast_column(column: &Column, target: ColumnType) -> Result<Column, ()> {
    let height = column.len();
    let name = column.name().clone();
    let mut non_null_in = 0usize;
    let mut non_null_out = 0usize;

    macro_rules! collect {
        ($convert:expr) => {{
            let mut values = Vec::with_capacity(height);
            for idx in 0..height {
                let cell = column.get(idx).map_err(|_| ())?;
                if !matches!(cell, AnyValue::Null) {
                    non_null_in += 1;
                }
                let converted = $convert(cell);
                if converted.is_some() {
                    non_null_out += 1;
                }
                values.push(converted);
            }
            values
        }};
    }

    let cast = match target {
        ColumnType::String => {
            let values: Vec<Option<String>> = collect!(cell_to_string);
            Column::new(name, values)
        }
        ColumnType::Integer => {
            let values: Vec<Option<i64>> = collect!(cell_to_integer);
            Column::new(name, values)
        }
        ColumnType::Float => {
            let values: Vec<Option<f64>> = collect!(cell_to_float);
            Column::new(name, values)
        }
        ColumnType::Boolean => {
            let values: Vec<Option<bool>> = collect!(cell_to_boolean);
            Column::new(name, values)
        }
        ColumnType::Timestamp => {
            let values: Vec<Option<i64>> = collect!(cell_to_millis);
            Column::new(name, values)
                .cast(&ColumnType::Timestamp.to_polars())
                .map_err(|_| ())?
        }
    };

    if non_null_in > 0 && non_null_out == 0 {
        return Err(());
    }
    Ok(cast)
}

fn cell_to_string(cell: AnyValue) -> Option<String> {
    match cell {
        AnyValue::Null => None,
        AnyValue::String(s) => Some(s.to_string()),
        AnyValue::StringOwned(s) => Some(s.to_string()),
        other => Some(format!("{other}")),
    }
}

fn cell_to_integer(cell: AnyValue) -> Option<i64> {
    match cell {
        AnyValue::Null => None,
        AnyValue::Int8(v) => Some(v as i64),
        AnyValue::Int16(v) => Some(v as i64),
        AnyValue::Int32(v) => Some(v as i64),
        AnyValue::Int64(v) => Some(v),
        AnyValue::UInt8(v) => Some(v as i64),
        AnyValue::UInt16(v) => Some(v as i64),
        AnyValue::UInt32(v) => Some(v as i64),
        AnyValue::UInt64(v) => i64::try_from(v).ok(),
        AnyValue::Float32(v) if v.is_finite() => Some(v as i64),
        AnyValue::Float64(v) if v.is_finite() => Some(v as i64),
        AnyValue::Boolean(b) => Some(i64::from(b)),
        AnyValue::String(s) => s.trim().parse().ok(),
        AnyValue::StringOwned(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn cell_to_float(cell: AnyValue) -> Option<f64> {
    match cell {
        AnyValue::Null => None,
        AnyValue::Int8(v) => Some(v as f64),
        AnyValue::Int16(v) => Some(v as f64),
        AnyValue::Int32(v) => Some(v as f64),
        AnyValue::Int64(v) => Some(v as f64),
        AnyValue::UInt8(v) => Some(v as f64),
        AnyValue::UInt16(v) => Some(v as f64),
        AnyValue::UInt32(v) => Some(v as f64),
        AnyValue::UInt64(v) => Some(v as f64),
        AnyValue::Float32(v) => Some(f64::from(v)),
        AnyValue::Float64(v) => Some(v),
        AnyValue::Boolean(b) => Some(if b { 1.0 } else { 0.0 }),
        AnyValue::String(s) => s.trim().parse().ok(),
        AnyValue::StringOwned(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn cell_to_boolean(cell: AnyValue) -> Option<bool> {
    let token = match cell {
        AnyValue::Null => return None,
        AnyValue::Boolean(b) => return Some(b),
        AnyValue::Int64(v) => return boolean_from_int(v),
        AnyValue::Int32(v) => return boolean_from_int(v as i64),
        AnyValue::String(s) => s.to_string(),
        AnyValue::StringOwned(s) => s.to_string(),
        _ => return None,
    };
    match token.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn boolean_from_int(v: i64) -> Option<bool> {
    match v {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}

fn cell_to_millis(cell: AnyValue) -> Option<i64> {
    match cell {
        AnyValue::Null => None,
        AnyValue::Datetime(ms, _, _) => Some(ms),
        AnyValue::DatetimeOwned(ms, _, _) => Some(ms),
        AnyValue::Int64(v) => Some(v),
        AnyValue::String(s) => parse_lenient_utc(s).map(|ts| ts.timestamp_millis()),
        AnyValue::StringOwned(s) => parse_lenient_utc(&s).map(|ts| ts.timestamp_millis()),
        _ => None,
    }
}
