//! # warden-metrics
//!
//! Prometheus metrics for the forward-auth sidecar.
//!
//! Metric names are fixed for dashboard compatibility; renaming any of them
//! breaks downstream Grafana boards. All handles are cheap clones sharing the
//! underlying atomics, so subsystems receive their slice of the registry at
//! construction time.
//!
//! # Example
//!
//! ```rust
//! use warden_metrics::ForwardAuthMetrics;
//!
//! let metrics = ForwardAuthMetrics::new();
//! metrics.requests().inc_result("allowed");
//! metrics.edl().set_entries(42);
//!
//! let output = metrics.encode();
//! assert!(output.contains("forwardauth_requests_total"));
//! assert!(output.contains("forwardauth_edl_entries"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use parking_lot::RwLock;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Label set for per-result request metrics (`allowed`, `denied`, `invalid`).
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResultLabels {
    /// The decision outcome label.
    pub result: String,
}

/// Label set for EDL update attempts (`success`, `failure`).
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StatusLabels {
    /// The update outcome label.
    pub status: String,
}

fn request_duration_histogram() -> Histogram {
    // 100µs to ~51ms; the decision path is a binary search plus header work.
    Histogram::new(exponential_buckets(0.0001, 2.0, 10))
}

/// Request-path metrics.
#[derive(Clone)]
pub struct RequestMetrics {
    requests: Family<ResultLabels, Counter>,
    duration_seconds: Family<ResultLabels, Histogram>,
}

impl std::fmt::Debug for RequestMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestMetrics").finish_non_exhaustive()
    }
}

impl RequestMetrics {
    fn new(registry: &mut Registry) -> Self {
        let requests = Family::<ResultLabels, Counter>::default();
        registry.register(
            "forwardauth_requests",
            "Total number of auth requests",
            requests.clone(),
        );

        let duration_seconds = Family::<ResultLabels, Histogram>::new_with_constructor(
            request_duration_histogram as fn() -> Histogram,
        );
        registry.register(
            "forwardauth_request_duration_seconds",
            "Request duration in seconds",
            duration_seconds.clone(),
        );

        Self {
            requests,
            duration_seconds,
        }
    }

    /// Increments the request counter for a result label.
    pub fn inc_result(&self, result: &str) {
        self.requests
            .get_or_create(&ResultLabels {
                result: result.to_string(),
            })
            .inc();
    }

    /// Records a request duration for a result label.
    pub fn observe_duration(&self, result: &str, seconds: f64) {
        self.duration_seconds
            .get_or_create(&ResultLabels {
                result: result.to_string(),
            })
            .observe(seconds);
    }

    /// Current counter value for a result label.
    #[must_use]
    pub fn get_result(&self, result: &str) -> u64 {
        self.requests
            .get_or_create(&ResultLabels {
                result: result.to_string(),
            })
            .get()
    }
}

/// EDL pipeline metrics.
#[derive(Clone)]
pub struct EdlMetrics {
    entries: Gauge,
    updates: Family<StatusLabels, Counter>,
    last_update_timestamp: Gauge,
    update_duration_seconds: Histogram,
}

impl std::fmt::Debug for EdlMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdlMetrics")
            .field("entries", &self.entries.get())
            .finish_non_exhaustive()
    }
}

impl EdlMetrics {
    fn new(registry: &mut Registry) -> Self {
        let entries = Gauge::default();
        registry.register(
            "forwardauth_edl_entries",
            "Current number of loaded EDL entries",
            entries.clone(),
        );

        let updates = Family::<StatusLabels, Counter>::default();
        registry.register(
            "forwardauth_edl_updates",
            "Total number of EDL update attempts",
            updates.clone(),
        );

        let last_update_timestamp = Gauge::default();
        registry.register(
            "forwardauth_edl_last_update_timestamp",
            "Unix timestamp of last successful EDL update",
            last_update_timestamp.clone(),
        );

        // 100ms to ~51s; dominated by the feed download.
        let update_duration_seconds = Histogram::new(exponential_buckets(0.1, 2.0, 10));
        registry.register(
            "forwardauth_edl_update_duration_seconds",
            "EDL update operation duration in seconds",
            update_duration_seconds.clone(),
        );

        Self {
            entries,
            updates,
            last_update_timestamp,
            update_duration_seconds,
        }
    }

    /// Sets the current entry-count gauge.
    pub fn set_entries(&self, count: i64) {
        self.entries.set(count);
    }

    /// Current entry-count gauge value.
    #[must_use]
    pub fn get_entries(&self) -> i64 {
        self.entries.get()
    }

    /// Increments the update counter for a status label.
    pub fn inc_update(&self, status: &str) {
        self.updates
            .get_or_create(&StatusLabels {
                status: status.to_string(),
            })
            .inc();
    }

    /// Current update counter value for a status label.
    #[must_use]
    pub fn get_updates(&self, status: &str) -> u64 {
        self.updates
            .get_or_create(&StatusLabels {
                status: status.to_string(),
            })
            .get()
    }

    /// Records the Unix timestamp of the last successful update.
    pub fn set_last_update_timestamp(&self, unix_seconds: i64) {
        self.last_update_timestamp.set(unix_seconds);
    }

    /// Records how long an update cycle took.
    pub fn observe_update_duration(&self, seconds: f64) {
        self.update_duration_seconds.observe(seconds);
    }
}

/// Log-shipping metrics.
#[derive(Clone)]
pub struct ShippingMetrics {
    events_shipped: Counter,
    events_dropped: Counter,
    shipping_errors: Counter,
    batches_sent: Counter,
    bucket_tokens_available: Gauge,
    buffer_size: Gauge,
}

impl std::fmt::Debug for ShippingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShippingMetrics").finish_non_exhaustive()
    }
}

impl ShippingMetrics {
    fn new(registry: &mut Registry) -> Self {
        let events_shipped = Counter::default();
        registry.register(
            "forwardauth_log_events_shipped",
            "Total number of log events successfully shipped",
            events_shipped.clone(),
        );

        let events_dropped = Counter::default();
        registry.register(
            "forwardauth_log_events_dropped",
            "Total number of log events dropped due to buffer overflow",
            events_dropped.clone(),
        );

        let shipping_errors = Counter::default();
        registry.register(
            "forwardauth_log_shipping_errors",
            "Total number of log shipping errors",
            shipping_errors.clone(),
        );

        let batches_sent = Counter::default();
        registry.register(
            "forwardauth_log_batches_sent",
            "Total number of log batches sent",
            batches_sent.clone(),
        );

        let bucket_tokens_available = Gauge::default();
        registry.register(
            "forwardauth_leaky_bucket_tokens_available",
            "Current number of tokens available in the leaky bucket",
            bucket_tokens_available.clone(),
        );

        let buffer_size = Gauge::default();
        registry.register(
            "forwardauth_log_buffer_size",
            "Current number of events in the log buffer",
            buffer_size.clone(),
        );

        Self {
            events_shipped,
            events_dropped,
            shipping_errors,
            batches_sent,
            bucket_tokens_available,
            buffer_size,
        }
    }

    /// Adds to the shipped-events counter.
    pub fn add_events_shipped(&self, n: u64) {
        self.events_shipped.inc_by(n);
    }

    /// Adds to the dropped-events counter.
    pub fn add_events_dropped(&self, n: u64) {
        self.events_dropped.inc_by(n);
    }

    /// Adds to the shipping-errors counter.
    pub fn add_shipping_errors(&self, n: u64) {
        self.shipping_errors.inc_by(n);
    }

    /// Adds to the batches-sent counter.
    pub fn add_batches_sent(&self, n: u64) {
        self.batches_sent.inc_by(n);
    }

    /// Sets the leaky-bucket tokens gauge.
    pub fn set_bucket_tokens(&self, tokens: i64) {
        self.bucket_tokens_available.set(tokens);
    }

    /// Sets the overflow-buffer size gauge.
    pub fn set_buffer_size(&self, size: i64) {
        self.buffer_size.set(size);
    }

    /// Current shipped-events counter value.
    #[must_use]
    pub fn get_events_shipped(&self) -> u64 {
        self.events_shipped.get()
    }

    /// Current dropped-events counter value.
    #[must_use]
    pub fn get_events_dropped(&self) -> u64 {
        self.events_dropped.get()
    }
}

/// Central metrics registry for the sidecar.
///
/// Cloning shares the underlying registry and metric atomics.
#[derive(Clone)]
pub struct ForwardAuthMetrics {
    registry: Arc<RwLock<Registry>>,
    requests: RequestMetrics,
    edl: EdlMetrics,
    shipping: ShippingMetrics,
}

impl std::fmt::Debug for ForwardAuthMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardAuthMetrics")
            .field("edl", &self.edl)
            .finish_non_exhaustive()
    }
}

impl Default for ForwardAuthMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ForwardAuthMetrics {
    /// Creates a registry with every sidecar metric registered.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests = RequestMetrics::new(&mut registry);
        let edl = EdlMetrics::new(&mut registry);
        let shipping = ShippingMetrics::new(&mut registry);

        Self {
            registry: Arc::new(RwLock::new(registry)),
            requests,
            edl,
            shipping,
        }
    }

    /// Request-path metrics handle.
    #[must_use]
    pub fn requests(&self) -> &RequestMetrics {
        &self.requests
    }

    /// EDL pipeline metrics handle.
    #[must_use]
    pub fn edl(&self) -> &EdlMetrics {
        &self.edl
    }

    /// Log-shipping metrics handle.
    #[must_use]
    pub fn shipping(&self) -> &ShippingMetrics {
        &self.shipping
    }

    /// Encodes all metrics in Prometheus text exposition format.
    #[must_use]
    pub fn encode(&self) -> String {
        let registry = self.registry.read();
        let mut buffer = String::new();
        if encode(&mut buffer, &registry).is_err() {
            tracing::error!("failed to encode prometheus metrics");
            return String::new();
        }
        buffer
    }

    /// Content-Type header value for the exposition format.
    #[must_use]
    pub const fn content_type() -> &'static str {
        "text/plain; version=0.0.4; charset=utf-8"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Registry Tests ====================

    #[test]
    fn test_create_registry() {
        let metrics = ForwardAuthMetrics::new();
        assert_eq!(metrics.requests().get_result("allowed"), 0);
        assert_eq!(metrics.edl().get_entries(), 0);
    }

    #[test]
    fn test_cloned_registry_shares_state() {
        let metrics1 = ForwardAuthMetrics::new();
        let metrics2 = metrics1.clone();

        metrics1.requests().inc_result("denied");
        assert_eq!(metrics2.requests().get_result("denied"), 1);

        metrics2.shipping().add_events_shipped(5);
        assert_eq!(metrics1.shipping().get_events_shipped(), 5);
    }

    #[test]
    fn test_encode_includes_fixed_names() {
        let metrics = ForwardAuthMetrics::new();

        metrics.requests().inc_result("allowed");
        metrics.requests().observe_duration("allowed", 0.0005);
        metrics.edl().set_entries(10);
        metrics.edl().inc_update("success");
        metrics.edl().set_last_update_timestamp(1_700_000_000);
        metrics.edl().observe_update_duration(0.5);
        metrics.shipping().add_events_shipped(1);
        metrics.shipping().add_events_dropped(2);
        metrics.shipping().add_shipping_errors(3);
        metrics.shipping().add_batches_sent(4);
        metrics.shipping().set_bucket_tokens(100);
        metrics.shipping().set_buffer_size(7);

        let output = metrics.encode();

        // Names are fixed for dashboard compatibility.
        assert!(output.contains("forwardauth_requests_total"));
        assert!(output.contains("forwardauth_request_duration_seconds"));
        assert!(output.contains("forwardauth_edl_entries"));
        assert!(output.contains("forwardauth_edl_updates_total"));
        assert!(output.contains("forwardauth_edl_last_update_timestamp"));
        assert!(output.contains("forwardauth_edl_update_duration_seconds"));
        assert!(output.contains("forwardauth_log_events_shipped_total"));
        assert!(output.contains("forwardauth_log_events_dropped_total"));
        assert!(output.contains("forwardauth_log_shipping_errors_total"));
        assert!(output.contains("forwardauth_log_batches_sent_total"));
        assert!(output.contains("forwardauth_leaky_bucket_tokens_available"));
        assert!(output.contains("forwardauth_log_buffer_size"));
    }

    #[test]
    fn test_result_labels_in_output() {
        let metrics = ForwardAuthMetrics::new();
        metrics.requests().inc_result("allowed");
        metrics.requests().inc_result("denied");
        metrics.requests().inc_result("invalid");

        let output = metrics.encode();
        assert!(output.contains("result=\"allowed\""));
        assert!(output.contains("result=\"denied\""));
        assert!(output.contains("result=\"invalid\""));
    }

    #[test]
    fn test_update_status_labels_in_output() {
        let metrics = ForwardAuthMetrics::new();
        metrics.edl().inc_update("success");
        metrics.edl().inc_update("failure");

        let output = metrics.encode();
        assert!(output.contains("status=\"success\""));
        assert!(output.contains("status=\"failure\""));
        assert_eq!(metrics.edl().get_updates("success"), 1);
        assert_eq!(metrics.edl().get_updates("failure"), 1);
    }

    #[test]
    fn test_content_type() {
        let ct = ForwardAuthMetrics::content_type();
        assert!(ct.contains("text/plain"));
        assert!(ct.contains("0.0.4"));
    }

    // ==================== Counter Semantics Tests ====================

    #[test]
    fn test_request_counter_accumulates() {
        let metrics = ForwardAuthMetrics::new();

        for _ in 0..5 {
            metrics.requests().inc_result("allowed");
        }
        for _ in 0..3 {
            metrics.requests().inc_result("denied");
        }

        assert_eq!(metrics.requests().get_result("allowed"), 5);
        assert_eq!(metrics.requests().get_result("denied"), 3);
        assert_eq!(metrics.requests().get_result("invalid"), 0);
    }

    #[test]
    fn test_shipping_counters_add_deltas() {
        let metrics = ForwardAuthMetrics::new();

        metrics.shipping().add_events_shipped(100);
        metrics.shipping().add_events_shipped(50);
        metrics.shipping().add_events_dropped(7);

        assert_eq!(metrics.shipping().get_events_shipped(), 150);
        assert_eq!(metrics.shipping().get_events_dropped(), 7);
    }

    #[test]
    fn test_gauges_overwrite() {
        let metrics = ForwardAuthMetrics::new();

        metrics.edl().set_entries(100);
        metrics.edl().set_entries(42);
        assert_eq!(metrics.edl().get_entries(), 42);

        metrics.shipping().set_bucket_tokens(1000);
        metrics.shipping().set_buffer_size(0);

        let output = metrics.encode();
        assert!(output.contains("forwardauth_edl_entries 42"));
        assert!(output.contains("forwardauth_leaky_bucket_tokens_available 1000"));
    }
}
