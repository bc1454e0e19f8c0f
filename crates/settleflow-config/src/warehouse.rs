//! Warehouse destination and load-policy configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Warehouse destination and load-policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Root directory of the local warehouse backend
    pub root_dir: PathBuf,

    /// Logical dataset (namespace) the destination tables live under
    pub dataset: String,

    /// Prefix prepended to per-dataset table names
    pub table_prefix: String,

    /// Load retry policy
    pub load_retry: LoadRetryConfig,

    /// Quota monitoring thresholds
    pub quota: QuotaConfig,
}

/// Retry policy for warehouse load jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRetryConfig {
    /// Maximum load attempts per batch before giving up
    pub max_attempts: u32,

    /// Base quota backoff delay in seconds
    pub backoff_base_secs: u64,

    /// Cap on any single quota backoff sleep in seconds
    pub backoff_cap_secs: u64,
}

/// Quota monitoring thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Seconds a usage sample stays fresh before re-polling
    pub cache_ttl_secs: u64,

    /// Usage ratio above which the loader is asked to throttle
    pub threshold_ratio: f64,

    /// Cap on the recommended throttle wait in seconds
    pub max_wait_secs: u64,

    /// Storage byte budget the local backend reports usage against
    pub storage_bytes_cap: u64,

    /// Part-count budget per table the local backend reports usage against
    pub table_parts_cap: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./warehouse"),
            dataset: "settlement".to_string(),
            table_prefix: "raw_".to_string(),
            load_retry: LoadRetryConfig::default(),
            quota: QuotaConfig::default(),
        }
    }
}

impl Default for LoadRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_secs: 2,
            backoff_cap_secs: 120,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 60,
            threshold_ratio: 0.8,
            max_wait_secs: 300,
            storage_bytes_cap: 50 * 1024 * 1024 * 1024,
            table_parts_cap: 10_000,
        }
    }
}

impl WarehouseConfig {
    /// Destination table name for a dataset code.
    pub fn table_name(&self, dataset_code: &str) -> String {
        format!("{}{}", self.table_prefix, dataset_code.to_lowercase())
    }
}
