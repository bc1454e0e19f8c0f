//! Response payload decoding
//!
//! The upstream wraps tabular data in several shapes depending on the
//! endpoint generation: `{"data": [...]}`, `{"results": [...]}`, a bare
//! array, or a single object. The CSV fallback returns plain text. All
//! of them decode into the same uniform row representation consumed by
//! the normalizer.

use serde_json::{Map, Value};

/// One upstream record: column name to JSON value.
pub type RawRow = Map<String, Value>;

/// Extract rows from a decoded JSON payload.
///
/// Handles `{"data": [...]}`, `{"results": [...]}`, bare arrays, and
/// single objects. Non-object array elements are skipped. Anything else
/// yields no rows.
pub fn rows_from_json(value: &Value) -> Vec<RawRow> {
    let items: &[Value] = match value {
        Value::Array(items) => items,
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("data") {
                items
            } else if let Some(Value::Array(items)) = map.get("results") {
                items
            } else {
                // A single object is a one-row payload.
                return vec![map.clone()];
            }
        }
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| item.as_object().cloned())
        .collect()
}

/// Parse CSV text into rows, inferring scalar types per field.
///
/// Empty fields become null; otherwise bool, integer and float tokens
/// are typed, and everything else stays a string.
pub fn rows_from_csv(text: &str) -> Result<Vec<RawRow>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Map::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            row.insert(header.to_string(), infer_scalar(field));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Type a CSV field: null for empties, then bool, integer, float, string.
fn infer_scalar(field: &str) -> Value {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    match trimmed {
        "true" | "True" | "TRUE" => return Value::Bool(true),
        "false" | "False" | "FALSE" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        if float.is_finite() {
            return Value::from(float);
        }
    }
    Value::String(trimmed.to_string())
}
