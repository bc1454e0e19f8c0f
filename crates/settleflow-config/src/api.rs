//! Upstream API configuration

use serde::{Deserialize, Serialize};

/// Upstream dataset API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL for the dataset API
    pub base_url: String,

    /// API keys rotated round-robin across requests; anonymous when empty
    pub api_keys: Vec<String>,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Number of retry attempts for transient transport failures
    pub retry_attempts: u32,

    /// Base delay between transient retries in milliseconds
    pub retry_delay_ms: u64,

    /// BM units appended as filter parameters where the dataset supports it
    pub bm_units: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://data.settlement-insights.example/v1".to_string(),
            api_keys: Vec::new(),
            request_timeout_secs: 30,
            retry_attempts: 3,
            retry_delay_ms: 500,
            bm_units: Vec::new(),
        }
    }
}

impl ApiConfig {
    /// Base URL without a trailing slash, for joining endpoint paths.
    pub fn base_url_trimmed(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}
