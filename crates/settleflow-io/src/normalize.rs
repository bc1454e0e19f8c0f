//! Row normalization
//!
//! Flattens heterogeneous JSON rows into a uniform DataFrame. Schema
//! drift is the norm upstream: the same dataset changes column sets and
//! spellings across years, so typing is inferred per batch and temporal
//! columns are detected by name rather than declared.
//!
//! Guarantees:
//! - the output column set is stable in name casing (case-insensitive
//!   duplicates collapse to the first-seen spelling)
//! - a column that looks temporal but will not parse is left untouched
//!   and logged, never an error
//! - provenance metadata columns are appended last and are the only
//!   columns with a leading underscore

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use settleflow_core::timestamp::parse_lenient_utc;
use settleflow_core::window::TimeWindow;

/// Dataset code the rows came from.
pub const META_DATASET: &str = "_dataset";
/// Window start the fetch covered.
pub const META_WINDOW_FROM: &str = "_window_from";
/// Window end the fetch covered.
pub const META_WINDOW_TO: &str = "_window_to";
/// Wall-clock ingestion instant.
pub const META_INGESTED_AT: &str = "_ingested_at";
/// JSON list of the pre-metadata column names.
pub const META_SOURCE_COLUMNS: &str = "_source_columns";
/// Fixed tag of the originating API.
pub const META_SOURCE_API: &str = "_source_api";
/// Sorted business columns that fed the dedup hash.
pub const META_HASH_SOURCE_COLS: &str = "_hash_source_cols";
/// Content-hash idempotency key.
pub const META_HASH_KEY: &str = "_hash_key";

/// All metadata columns, in append order.
pub const METADATA_COLUMNS: &[&str] = &[
    META_DATASET,
    META_WINDOW_FROM,
    META_WINDOW_TO,
    META_INGESTED_AT,
    META_SOURCE_COLUMNS,
    META_SOURCE_API,
    META_HASH_SOURCE_COLS,
    META_HASH_KEY,
];

/// Metadata columns carry a leading underscore; business columns never do.
pub fn is_metadata_column(name: &str) -> bool {
    name.starts_with('_')
}

/// Column-name suffixes that suggest temporal content.
const TEMPORAL_SUFFIXES: &[&str] = &["date", "time", "period"];

/// Known non-temporal names that would otherwise match a suffix
/// (settlement-period ordinals are 1-50 integers, not instants).
const NON_TEMPORAL: &[&str] = &[
    "settlementperiod",
    "settlementperiodfrom",
    "settlementperiodto",
    "forecastperiod",
];

fn is_temporal_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    if NON_TEMPORAL.contains(&lower.as_str()) {
        return false;
    }
    TEMPORAL_SUFFIXES
        .iter()
        .any(|suffix| lower.ends_with(suffix))
}

/// Normalization errors.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
}

/// Inferred storage type of one column for this batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InferredType {
    Boolean,
    Integer,
    Float,
    Text,
}

/// Normalize upstream rows into a DataFrame with provenance metadata.
///
/// Business columns keep their first-seen spelling and order; the six
/// normalizer metadata columns are appended after them. Empty input
/// yields an empty DataFrame.
pub fn normalize(
    rows: &[serde_json::Map<String, Value>],
    dataset: &str,
    window: TimeWindow,
    source_api: &str,
) -> Result<DataFrame, NormalizeError> {
    if rows.is_empty() {
        return Ok(DataFrame::empty());
    }

    let columns = collect_columns(rows);
    let height = rows.len();
    let mut frame_columns: Vec<Column> = Vec::with_capacity(columns.len() + 6);

    for name in &columns {
        let values = column_values(rows, name);
        let column = build_column(dataset, name, &values)?;
        frame_columns.push(column);
    }

    let mut df = DataFrame::new(frame_columns)?;

    let ingested_at = Utc::now();
    df.with_column(Column::new(
        META_DATASET.into(),
        vec![dataset.to_uppercase(); height],
    ))?;
    df.with_column(datetime_column(META_WINDOW_FROM, window.start, height)?)?;
    df.with_column(datetime_column(META_WINDOW_TO, window.end, height)?)?;
    df.with_column(datetime_column(META_INGESTED_AT, ingested_at, height)?)?;
    let source_columns =
        serde_json::to_string(&columns).unwrap_or_else(|_| "[]".to_string());
    df.with_column(Column::new(
        META_SOURCE_COLUMNS.into(),
        vec![source_columns; height],
    ))?;
    df.with_column(Column::new(
        META_SOURCE_API.into(),
        vec![source_api.to_string(); height],
    ))?;

    Ok(df)
}

/// First-seen column names across all rows, with case-insensitive
/// duplicates collapsed to the first spelling.
fn collect_columns(rows: &[serde_json::Map<String, Value>]) -> Vec<String> {
    let mut seen_lower: Vec<String> = Vec::new();
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            let lower = key.to_lowercase();
            if !seen_lower.contains(&lower) {
                seen_lower.push(lower);
                columns.push(key.clone());
            }
        }
    }
    columns
}

/// Values for one canonical column across all rows, matched
/// case-insensitively against each row's own spelling.
fn column_values<'a>(
    rows: &'a [serde_json::Map<String, Value>],
    canonical: &str,
) -> Vec<Option<&'a Value>> {
    let lower = canonical.to_lowercase();
    rows.iter()
        .map(|row| {
            row.get(canonical)
                .or_else(|| {
                    row.iter()
                        .find(|(key, _)| key.to_lowercase() == lower)
                        .map(|(_, value)| value)
                })
                .filter(|value| !value.is_null())
        })
        .collect()
}

fn infer_type(values: &[Option<&Value>]) -> InferredType {
    let mut any = false;
    let mut all_bool = true;
    let mut all_int = true;
    let mut all_number = true;
    for value in values.iter().flatten() {
        any = true;
        all_bool &= value.is_boolean();
        all_int &= value.as_i64().is_some();
        all_number &= value.is_number();
    }
    if !any {
        return InferredType::Text;
    }
    if all_bool {
        InferredType::Boolean
    } else if all_int {
        InferredType::Integer
    } else if all_number {
        InferredType::Float
    } else {
        InferredType::Text
    }
}

/// Render a JSON value as cell text; nested structures are serialized.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn build_column(
    dataset: &str,
    name: &str,
    values: &[Option<&Value>],
) -> Result<Column, NormalizeError> {
    match infer_type(values) {
        InferredType::Boolean => {
            let data: Vec<Option<bool>> = values.iter().map(|v| v.and_then(Value::as_bool)).collect();
            Ok(Column::new(name.into(), data))
        }
        InferredType::Integer => {
            let data: Vec<Option<i64>> = values.iter().map(|v| v.and_then(Value::as_i64)).collect();
            Ok(Column::new(name.into(), data))
        }
        InferredType::Float => {
            let data: Vec<Option<f64>> = values.iter().map(|v| v.and_then(Value::as_f64)).collect();
            Ok(Column::new(name.into(), data))
        }
        InferredType::Text => {
            let data: Vec<Option<String>> = values
                .iter()
                .map(|v| v.map(value_to_text))
                .collect();
            if is_temporal_name(name) {
                if let Some(column) = temporal_column(name, &data)? {
                    return Ok(column);
                }
                warn!(
                    event_type = "temporal_parse_skipped",
                    dataset = %dataset,
                    column = %name,
                    "Column looks temporal but did not parse, leaving as text"
                );
            }
            Ok(Column::new(name.into(), data))
        }
    }
}

/// Try to parse every non-null value of a text column as a timestamp.
/// Returns `None` when any value refuses, leaving the column to stay
/// text.
fn temporal_column(
    name: &str,
    data: &[Option<String>],
) -> Result<Option<Column>, NormalizeError> {
    let mut millis: Vec<Option<i64>> = Vec::with_capacity(data.len());
    for value in data {
        match value {
            None => millis.push(None),
            Some(text) => match parse_lenient_utc(text) {
                Some(parsed) => millis.push(Some(parsed.timestamp_millis())),
                None => return Ok(None),
            },
        }
    }
    let column = Column::new(name.into(), millis)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
    Ok(Some(column))
}

/// Constant Datetime column from one instant.
fn datetime_column(
    name: &str,
    instant: DateTime<Utc>,
    height: usize,
) -> Result<Column, NormalizeError> {
    let millis = vec![instant.timestamp_millis(); height];
    let column = Column::new(name.into(), millis)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
    Ok(column)
}
