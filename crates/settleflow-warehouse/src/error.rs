//! Warehouse error taxonomy
//!
//! The loader dispatches on three error classes: quota exhaustion
//! (long backoff and retry), deadline exceeded (bisect the batch), and
//! everything else (fail fast into the minimal fallback). Quota
//! conditions are also recognized by message pattern so backends that
//! only surface opaque job errors still trigger the right path.

use thiserror::Error;

/// Message fragments that mark a quota/rate condition.
const QUOTA_PATTERNS: &[&str] = &["quotaExceeded", "rateLimitExceeded", "quota exceeded"];

/// Errors surfaced by warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// The table does not exist. Distinguishable so callers can create it.
    #[error("table {table} not found")]
    TableNotFound { table: String },

    /// A usage quota refused the job.
    #[error("quota exceeded: {message}")]
    QuotaExceeded { message: String },

    /// The load job ran past its deadline.
    #[error("deadline exceeded loading {table}")]
    DeadlineExceeded { table: String },

    /// The frame does not fit the declared schema.
    #[error("schema violation on {table}: {message}")]
    Schema { table: String, message: String },

    /// Backend storage failure.
    #[error("storage failure: {message}")]
    Storage { message: String },

    /// Filesystem failure in the local backend.
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    /// Frame-level failure in the local backend.
    #[error("polars failure: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}

impl WarehouseError {
    /// Whether this error is a quota condition, by variant or by
    /// message pattern.
    pub fn is_quota(&self) -> bool {
        match self {
            WarehouseError::QuotaExceeded { .. } => true,
            WarehouseError::Storage { message } => QUOTA_PATTERNS
                .iter()
                .any(|pattern| message.contains(pattern)),
            _ => false,
        }
    }

    /// Whether this error is a deadline condition.
    pub fn is_deadline(&self) -> bool {
        matches!(self, WarehouseError::DeadlineExceeded { .. })
    }

    /// Whether this error means the table does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, WarehouseError::TableNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_by_variant() {
        let err = WarehouseError::QuotaExceeded {
            message: "daily bytes".to_string(),
        };
        assert!(err.is_quota());
        assert!(!err.is_deadline());
    }

    #[test]
    fn test_quota_by_message_pattern() {
        let err = WarehouseError::Storage {
            message: "job failed: quotaExceeded for project".to_string(),
        };
        assert!(err.is_quota());

        let err = WarehouseError::Storage {
            message: "disk full".to_string(),
        };
        assert!(!err.is_quota());
    }

    #[test]
    fn test_classification_is_disjoint() {
        let err = WarehouseError::DeadlineExceeded {
            table: "settlement.raw_pn".to_string(),
        };
        assert!(err.is_deadline());
        assert!(!err.is_quota());
        assert!(!err.is_not_found());

        let err = WarehouseError::TableNotFound {
            table: "settlement.raw_pn".to_string(),
        };
        assert!(err.is_not_found());
    }
}
