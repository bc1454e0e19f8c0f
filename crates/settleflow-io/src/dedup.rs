//! Content-hash dedup keys
//!
//! Every row gets a deterministic SHA-256 digest of its business
//! content: null and NaN values dropped, remaining values coerced to
//! primitive string/number/bool, JSON-encoded as a sorted map, hashed.
//! Re-ingesting the same logical record therefore produces the same key
//! regardless of column order, row order, or metadata columns, and
//! downstream queries deduplicate on it.

use std::collections::BTreeMap;

use polars::prelude::*;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::normalize::{is_metadata_column, META_HASH_KEY, META_HASH_SOURCE_COLS};

/// Dedup key generation errors.
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
}

/// Compute SHA-256 hash of data
///
/// Returns lowercase hex string (64 characters)
#[must_use]
pub fn compute_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Append `_hash_source_cols` and `_hash_key` to a frame.
///
/// Business columns are every column without a leading underscore,
/// hashed in sorted-name order. Metadata columns never contribute, so
/// adding more of them later leaves existing keys unchanged.
pub fn add_dedup_key(df: &DataFrame) -> Result<DataFrame, DedupError> {
    let mut business: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .filter(|name| !is_metadata_column(name))
        .collect();
    business.sort();

    let source_cols =
        serde_json::to_string(&business).unwrap_or_else(|_| "[]".to_string());

    let height = df.height();
    let mut keys: Vec<String> = Vec::with_capacity(height);
    for row in 0..height {
        let mut content: BTreeMap<&str, Value> = BTreeMap::new();
        for name in &business {
            let column = df.column(name.as_str())?;
            if let Some(value) = hashable_value(column.get(row)?) {
                content.insert(name.as_str(), value);
            }
        }
        let encoded =
            serde_json::to_string(&content).unwrap_or_else(|_| "{}".to_string());
        keys.push(compute_sha256(encoded.as_bytes()));
    }

    let mut out = df.clone();
    out.with_column(Column::new(
        META_HASH_SOURCE_COLS.into(),
        vec![source_cols; height],
    ))?;
    out.with_column(Column::new(META_HASH_KEY.into(), keys))?;
    Ok(out)
}

/// Coerce a cell to a primitive JSON value, dropping null/NaN.
fn hashable_value(value: AnyValue) -> Option<Value> {
    match value {
        AnyValue::Null => None,
        AnyValue::Boolean(b) => Some(Value::Bool(b)),
        AnyValue::Int8(v) => Some(Value::from(v)),
        AnyValue::Int16(v) => Some(Value::from(v)),
        AnyValue::Int32(v) => Some(Value::from(v)),
        AnyValue::Int64(v) => Some(Value::from(v)),
        AnyValue::UInt8(v) => Some(Value::from(v)),
        AnyValue::UInt16(v) => Some(Value::from(v)),
        AnyValue::UInt32(v) => Some(Value::from(v)),
        AnyValue::UInt64(v) => Some(Value::from(v)),
        AnyValue::Float32(v) => {
            if v.is_nan() {
                None
            } else {
                Some(Value::from(f64::from(v)))
            }
        }
        AnyValue::Float64(v) => {
            if v.is_nan() {
                None
            } else {
                Some(Value::from(v))
            }
        }
        AnyValue::String(s) => Some(Value::String(s.to_string())),
        AnyValue::StringOwned(s) => Some(Value::String(s.to_string())),
        AnyValue::Datetime(ms, _, _) => Some(Value::from(ms)),
        AnyValue::DatetimeOwned(ms, _, _) => Some(Value::from(ms)),
        other => Some(Value::String(format!("{other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::META_DATASET;

    fn key_at(df: &DataFrame, row: usize) -> String {
        df.column(META_HASH_KEY)
            .unwrap()
            .str()
            .unwrap()
            .get(row)
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        let df = DataFrame::new(vec![Column::new("x".into(), vec![1i64])]).unwrap();
        let hashed = add_dedup_key(&df).unwrap();
        let key = key_at(&hashed, 0);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_column_order_does_not_matter() {
        // Scenario: [{x:1, y:2}] and [{y:2, x:1}] must collide
        let a = DataFrame::new(vec![
            Column::new("x".into(), vec![1i64]),
            Column::new("y".into(), vec![2i64]),
        ])
        .unwrap();
        let b = DataFrame::new(vec![
            Column::new("y".into(), vec![2i64]),
            Column::new("x".into(), vec![1i64]),
        ])
        .unwrap();

        let a = add_dedup_key(&a).unwrap();
        let b = add_dedup_key(&b).unwrap();
        assert_eq!(key_at(&a, 0), key_at(&b, 0));
    }

    #[test]
    fn test_row_order_does_not_matter() {
        let a = DataFrame::new(vec![Column::new("x".into(), vec![1i64, 2])]).unwrap();
        let b = DataFrame::new(vec![Column::new("x".into(), vec![2i64, 1])]).unwrap();

        let a = add_dedup_key(&a).unwrap();
        let b = add_dedup_key(&b).unwrap();
        assert_eq!(key_at(&a, 0), key_at(&b, 1));
        assert_eq!(key_at(&a, 1), key_at(&b, 0));
    }

    #[test]
    fn test_metadata_columns_do_not_affect_hash() {
        let plain = DataFrame::new(vec![Column::new("x".into(), vec![1i64])]).unwrap();
        let with_meta = DataFrame::new(vec![
            Column::new("x".into(), vec![1i64]),
            Column::new(META_DATASET.into(), vec!["FUELHH"]),
        ])
        .unwrap();

        let plain = add_dedup_key(&plain).unwrap();
        let with_meta = add_dedup_key(&with_meta).unwrap();
        assert_eq!(key_at(&plain, 0), key_at(&with_meta, 0));
    }

    #[test]
    fn test_null_values_dropped_from_hash() {
        // {x:1, y:null} hashes identically to {x:1}
        let with_null = DataFrame::new(vec![
            Column::new("x".into(), vec![Some(1i64)]),
            Column::new("y".into(), vec![None::<i64>]),
        ])
        .unwrap();
        let without = DataFrame::new(vec![Column::new("x".into(), vec![1i64])]).unwrap();

        let with_null = add_dedup_key(&with_null).unwrap();
        let without = add_dedup_key(&without).unwrap();
        assert_eq!(key_at(&with_null, 0), key_at(&without, 0));
    }

    #[test]
    fn test_nan_values_dropped_from_hash() {
        let with_nan = DataFrame::new(vec![
            Column::new("x".into(), vec![1i64]),
            Column::new("y".into(), vec![f64::NAN]),
        ])
        .unwrap();
        let without = DataFrame::new(vec![Column::new("x".into(), vec![1i64])]).unwrap();

        let with_nan = add_dedup_key(&with_nan).unwrap();
        let without = add_dedup_key(&without).unwrap();
        assert_eq!(key_at(&with_nan, 0), key_at(&without, 0));
    }

    #[test]
    fn test_business_content_change_changes_hash() {
        let a = DataFrame::new(vec![Column::new("x".into(), vec![1i64])]).unwrap();
        let b = DataFrame::new(vec![Column::new("x".into(), vec![2i64])]).unwrap();

        let a = add_dedup_key(&a).unwrap();
        let b = add_dedup_key(&b).unwrap();
        assert_ne!(key_at(&a, 0), key_at(&b, 0));
    }

    #[test]
    fn test_source_cols_sorted_and_business_only() {
        let df = DataFrame::new(vec![
            Column::new("zeta".into(), vec![1i64]),
            Column::new("alpha".into(), vec![2i64]),
            Column::new(META_DATASET.into(), vec!["X"]),
        ])
        .unwrap();
        let hashed = add_dedup_key(&df).unwrap();
        let recorded = hashed
            .column(META_HASH_SOURCE_COLS)
            .unwrap()
            .str()
            .unwrap()
            .get(0)
            .unwrap()
            .to_string();
        let cols: Vec<String> = serde_json::from_str(&recorded).unwrap();
        assert_eq!(cols, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
