//! Prometheus metrics for cygnet

use crate::error::{GatewayError, Result};
use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, HistogramVec, TextEncoder, register_counter,
    register_counter_vec, register_gauge_vec, register_histogram_vec,
};
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// All cygnet metrics
pub struct Metrics {
    // ─────────────────────────────────────────────────────────────────────────
    // Ingest
    // ─────────────────────────────────────────────────────────────────────────
    /// Notifications accepted (by source)
    pub events_accepted: CounterVec,

    /// Notifications refused at ingest (by source, reason)
    pub events_rejected: CounterVec,

    // ─────────────────────────────────────────────────────────────────────────
    // Channels
    // ─────────────────────────────────────────────────────────────────────────
    /// Queued plus in-flight events (by channel)
    pub channel_pending: GaugeVec,

    /// Configured capacity (by channel)
    pub channel_capacity: GaugeVec,

    // ─────────────────────────────────────────────────────────────────────────
    // Sinks
    // ─────────────────────────────────────────────────────────────────────────
    /// Context elements written (by sink)
    pub records_persisted: CounterVec,

    /// Notifications dropped as invalid (by sink)
    pub notifications_rejected: CounterVec,

    /// Failed backend calls (by sink)
    pub backend_failures: CounterVec,

    /// Time to persist one notification (by sink)
    pub persist_duration_seconds: HistogramVec,

    // ─────────────────────────────────────────────────────────────────────────
    // Supervisor
    // ─────────────────────────────────────────────────────────────────────────
    /// Configuration applications (by outcome)
    pub config_applied: CounterVec,

    /// Channel polls performed while draining
    pub drain_polls: Counter,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Returns error if metric registration fails.
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let err = |name: &str, e: prometheus::Error| GatewayError::Metrics(format!("{name}: {e}"));

        let metrics = Metrics {
            events_accepted: register_counter_vec!(
                "cygnet_events_accepted_total",
                "Notifications accepted into channels",
                &["source"]
            )
            .map_err(|e| err("events_accepted", e))?,

            events_rejected: register_counter_vec!(
                "cygnet_events_rejected_total",
                "Notifications refused at ingest",
                &["source", "reason"]
            )
            .map_err(|e| err("events_rejected", e))?,

            channel_pending: register_gauge_vec!(
                "cygnet_channel_pending",
                "Events queued or in flight",
                &["channel"]
            )
            .map_err(|e| err("channel_pending", e))?,

            channel_capacity: register_gauge_vec!(
                "cygnet_channel_capacity",
                "Maximum pending events",
                &["channel"]
            )
            .map_err(|e| err("channel_capacity", e))?,

            records_persisted: register_counter_vec!(
                "cygnet_records_persisted_total",
                "Context elements written to backends",
                &["sink"]
            )
            .map_err(|e| err("records_persisted", e))?,

            notifications_rejected: register_counter_vec!(
                "cygnet_notifications_rejected_total",
                "Invalid notifications dropped by sinks",
                &["sink"]
            )
            .map_err(|e| err("notifications_rejected", e))?,

            backend_failures: register_counter_vec!(
                "cygnet_backend_failures_total",
                "Failed backend calls",
                &["sink"]
            )
            .map_err(|e| err("backend_failures", e))?,

            persist_duration_seconds: register_histogram_vec!(
                "cygnet_persist_duration_seconds",
                "Time to persist one notification",
                &["sink"],
                vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
            )
            .map_err(|e| err("persist_duration_seconds", e))?,

            config_applied: register_counter_vec!(
                "cygnet_config_applied_total",
                "Pipeline configuration applications",
                &["outcome"]
            )
            .map_err(|e| err("config_applied", e))?,

            drain_polls: register_counter!(
                "cygnet_drain_polls_total",
                "Channel polls performed while draining"
            )
            .map_err(|e| err("drain_polls", e))?,
        };

        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| GatewayError::Metrics("Failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    pub fn record_accepted(&self, source: &str) {
        self.events_accepted.with_label_values(&[source]).inc();
    }

    pub fn record_rejected(&self, source: &str, reason: &str) {
        self.events_rejected
            .with_label_values(&[source, reason])
            .inc();
    }

    pub fn set_channel_pending(&self, channel: &str, pending: usize) {
        self.channel_pending
            .with_label_values(&[channel])
            .set(pending as f64);
    }

    pub fn set_channel_capacity(&self, channel: &str, capacity: usize) {
        self.channel_capacity
            .with_label_values(&[channel])
            .set(capacity as f64);
    }

    pub fn record_persisted(&self, sink: &str, count: u64) {
        self.records_persisted
            .with_label_values(&[sink])
            .inc_by(count as f64);
    }

    pub fn record_notification_rejected(&self, sink: &str) {
        self.notifications_rejected.with_label_values(&[sink]).inc();
    }

    pub fn record_backend_failure(&self, sink: &str) {
        self.backend_failures.with_label_values(&[sink]).inc();
    }

    pub fn record_persist_duration(&self, sink: &str, elapsed: Duration) {
        self.persist_duration_seconds
            .with_label_values(&[sink])
            .observe(elapsed.as_secs_f64());
    }

    /// Record a configuration outcome ("applied" or "failed")
    pub fn record_config(&self, outcome: &str) {
        self.config_applied.with_label_values(&[outcome]).inc();
    }

    pub fn inc_drain_polls(&self) {
        self.drain_polls.inc();
    }
}

/// Gather all metrics and encode as Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init_is_idempotent() {
        // another test may have initialized already
        let first = Metrics::init();
        let second = Metrics::init();
        if let (Ok(a), Ok(b)) = (first, second) {
            assert!(std::ptr::eq(a, b));
        }
    }

    #[test]
    fn test_recorded_values_show_in_gather() {
        let _ = Metrics::init();
        if let Some(metrics) = Metrics::get() {
            metrics.record_accepted("metrics-test-source");
            metrics.set_channel_pending("metrics-test-channel", 7);
            metrics.record_persist_duration("metrics-test-sink", Duration::from_millis(3));

            let text = gather();
            assert!(text.contains("cygnet_events_accepted_total"));
            assert!(text.contains("metrics-test-channel"));
            assert!(text.contains("cygnet_persist_duration_seconds"));
        }
    }

    #[test]
    fn test_counters_without_init_do_not_panic() {
        // code paths use Metrics::get(), which is None before init
        if let Some(metrics) = Metrics::get() {
            metrics.inc_drain_polls();
            metrics.record_config("applied");
        }
    }
}
