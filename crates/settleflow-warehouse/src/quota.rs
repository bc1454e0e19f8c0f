//! Quota monitoring
//!
//! Samples the warehouse's usage ratios on a cache interval and advises
//! the caller whether to throttle before submitting a load. The monitor
//! never sleeps; it only recommends a wait proportional to how far the
//! worst metric sits over its threshold.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use settleflow_config::QuotaConfig;

use crate::error::WarehouseError;
use crate::Warehouse;

/// Cached usage sampling with throttle advice.
#[derive(Debug)]
pub struct QuotaMonitor {
    config: QuotaConfig,
    cached: Option<Sample>,
}

#[derive(Debug)]
struct Sample {
    ratios: HashMap<String, f64>,
    sampled_at: Instant,
}

impl QuotaMonitor {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            cached: None,
        }
    }

    /// Whether the loader should wait before submitting, and for how
    /// long. `None` means go ahead.
    pub fn should_throttle<W: Warehouse>(
        &mut self,
        warehouse: &W,
    ) -> Result<Option<Duration>, WarehouseError> {
        let ratios = self.sample(warehouse)?;

        let threshold = self.config.threshold_ratio;
        let worst = ratios
            .iter()
            .filter(|(_, ratio)| **ratio > threshold)
            .max_by(|a, b| a.1.total_cmp(b.1));

        let Some((metric, ratio)) = worst else {
            return Ok(None);
        };

        // Wait grows with the overshoot and caps at the configured max.
        let headroom = (1.0 - threshold).max(f64::EPSILON);
        let overshoot = ((ratio - threshold) / headroom).clamp(0.0, 1.0);
        let wait = Duration::from_secs_f64(
            (self.config.max_wait_secs as f64 * overshoot).max(1.0),
        );

        warn!(
            event_type = "quota_throttle_advised",
            metric = %metric,
            usage_ratio = ratio,
            threshold = threshold,
            wait_secs = wait.as_secs_f64(),
            "Warehouse usage over threshold"
        );
        Ok(Some(wait))
    }

    /// Current (possibly cached) usage ratios.
    fn sample<W: Warehouse>(
        &mut self,
        warehouse: &W,
    ) -> Result<HashMap<String, f64>, WarehouseError> {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        if let Some(sample) = &self.cached {
            if sample.sampled_at.elapsed() < ttl {
                return Ok(sample.ratios.clone());
            }
        }

        let ratios = warehouse.usage_ratios()?;
        debug!(
            event_type = "quota_sampled",
            metric_count = ratios.len(),
            "Sampled warehouse usage"
        );
        self.cached = Some(Sample {
            ratios: ratios.clone(),
            sampled_at: Instant::now(),
        });
        Ok(ratios)
    }
}
