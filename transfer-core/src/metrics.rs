//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `transfers_total` - Committed transfers
//! - `transfer_failures_total` - Transfers that returned an error
//! - `transfer_retries_total` - Extra attempts made by the retry policy
//! - `transfer_duration_seconds` - End-to-end transfer latency, retries included

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Committed transfers
    pub transfers_total: IntCounter,

    /// Failed transfers
    pub transfer_failures_total: IntCounter,

    /// Retries performed
    pub transfer_retries_total: IntCounter,

    /// Transfer latency
    pub transfer_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transfers_total = IntCounter::new("transfers_total", "Committed transfers")?;
        registry.register(Box::new(transfers_total.clone()))?;

        let transfer_failures_total =
            IntCounter::new("transfer_failures_total", "Transfers that returned an error")?;
        registry.register(Box::new(transfer_failures_total.clone()))?;

        let transfer_retries_total =
            IntCounter::new("transfer_retries_total", "Extra attempts made by the retry policy")?;
        registry.register(Box::new(transfer_retries_total.clone()))?;

        let transfer_duration = Histogram::with_opts(
            HistogramOpts::new("transfer_duration_seconds", "End-to-end transfer latency")
                .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 5.0]),
        )?;
        registry.register(Box::new(transfer_duration.clone()))?;

        Ok(Self {
            transfers_total,
            transfer_failures_total,
            transfer_retries_total,
            transfer_duration,
            registry,
        })
    }

    /// Record the end of one transfer call
    pub fn record_transfer(&self, succeeded: bool, attempts: u32, duration_seconds: f64) {
        if succeeded {
            self.transfers_total.inc();
        } else {
            self.transfer_failures_total.inc();
        }
        self.transfer_retries_total
            .inc_by(u64::from(attempts.saturating_sub(1)));
        self.transfer_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.transfers_total.get(), 0);
        assert_eq!(metrics.transfer_failures_total.get(), 0);
    }

    #[test]
    fn test_instances_do_not_collide() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.record_transfer(true, 1, 0.002);
        assert_eq!(first.transfers_total.get(), 1);
        assert_eq!(second.transfers_total.get(), 0);
    }

    #[test]
    fn test_record_transfer() {
        let metrics = Metrics::new().unwrap();
        metrics.record_transfer(true, 3, 0.2);
        metrics.record_transfer(false, 1, 0.01);

        assert_eq!(metrics.transfers_total.get(), 1);
        assert_eq!(metrics.transfer_failures_total.get(), 1);
        assert_eq!(metrics.transfer_retries_total.get(), 2);
        assert_eq!(metrics.transfer_duration.get_sample_count(), 2);
        assert_eq!(metrics.registry().gather().len(), 4);
    }
}
