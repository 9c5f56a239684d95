//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `ledger_saves_total` - Accepted saves
//! - `ledger_saves_rejected_total` - Saves rejected by the credit limit
//! - `ledger_flushes_total` - Segments written by the write-behind writer
//! - `ledger_flush_failures_total` - Batches dropped after a write failure
//! - `ledger_flush_batch_size` - Histogram of records per segment

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::fmt;
use std::sync::Arc;

/// Metrics collector
///
/// Each instance owns its registry, so several ledgers (tests) can coexist.
#[derive(Clone)]
pub struct Metrics {
    /// Accepted saves
    pub saves_total: IntCounter,

    /// Limit rejections
    pub saves_rejected: IntCounter,

    /// Segments written
    pub flushes_total: IntCounter,

    /// Dropped batches
    pub flush_failures: IntCounter,

    /// Records per flushed segment
    pub flush_batch_size: Histogram,

    registry: Arc<Registry>,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("saves_total", &self.saves_total.get())
            .field("saves_rejected", &self.saves_rejected.get())
            .field("flushes_total", &self.flushes_total.get())
            .field("flush_failures", &self.flush_failures.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let saves_total = IntCounter::new("ledger_saves_total", "Accepted saves")?;
        registry.register(Box::new(saves_total.clone()))?;

        let saves_rejected = IntCounter::new(
            "ledger_saves_rejected_total",
            "Saves rejected by the credit limit",
        )?;
        registry.register(Box::new(saves_rejected.clone()))?;

        let flushes_total = IntCounter::new("ledger_flushes_total", "Segments written")?;
        registry.register(Box::new(flushes_total.clone()))?;

        let flush_failures = IntCounter::new(
            "ledger_flush_failures_total",
            "Batches dropped after a segment write failure",
        )?;
        registry.register(Box::new(flush_failures.clone()))?;

        let flush_batch_size = Histogram::with_opts(
            HistogramOpts::new("ledger_flush_batch_size", "Records per flushed segment")
                .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]),
        )?;
        registry.register(Box::new(flush_batch_size.clone()))?;

        Ok(Self {
            saves_total,
            saves_rejected,
            flushes_total,
            flush_failures,
            flush_batch_size,
            registry,
        })
    }

    /// Record an accepted save
    pub fn record_save(&self) {
        self.saves_total.inc();
    }

    /// Record a limit rejection
    pub fn record_rejection(&self) {
        self.saves_rejected.inc();
    }

    /// Record a written segment
    pub fn record_flush(&self, batch_size: usize) {
        self.flushes_total.inc();
        self.flush_batch_size.observe(batch_size as f64);
    }

    /// Record a dropped batch
    pub fn record_flush_failure(&self) {
        self.flush_failures.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every metric
    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.saves_total.get(), 0);
        assert_eq!(metrics.flushes_total.get(), 0);

        // Independent registries
        let other = Metrics::new().unwrap();
        other.record_save();
        assert_eq!(metrics.saves_total.get(), 0);
    }

    #[test]
    fn test_debug_shows_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_save();
        let debug = format!("{:?}", metrics);
        assert!(debug.contains("saves_total: 1"));
    }

    #[test]
    fn test_record_flush() {
        let metrics = Metrics::new().unwrap();
        metrics.record_flush(100);
        metrics.record_flush(50);
        assert_eq!(metrics.flushes_total.get(), 2);
        assert_eq!(metrics.flush_batch_size.get_sample_count(), 2);
        assert_eq!(metrics.flush_batch_size.get_sample_sum(), 150.0);
    }

    #[test]
    fn test_encode_text() {
        let metrics = Metrics::new().unwrap();
        metrics.record_save();
        metrics.record_rejection();

        let text = metrics.encode_text();
        assert!(text.contains("ledger_saves_total 1"));
        assert!(text.contains("ledger_saves_rejected_total 1"));
    }
}
