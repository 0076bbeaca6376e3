//! Observability for the annotate and state paths
//!
//! Provides:
//! - Prometheus metrics (annotate outcomes, confirmation latency, projection size)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};

/// Histogram buckets for confirmation latency (in seconds)
const CONFIRMATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ServerMetricsInner> = OnceLock::new();

struct ServerMetricsInner {
    annotate_batches: IntCounterVec,
    annotated_items: IntCounterVec,
    confirmation_latency_seconds: HistogramVec,
    confirmation_timeouts: IntCounterVec,
    projected_records: IntGauge,
    skipped_resources: IntCounter,
}

impl ServerMetricsInner {
    fn new() -> Self {
        Self {
            annotate_batches: register_int_counter_vec!(
                "ezkonnect_annotate_batches_total",
                "Annotate batches handled, by feature and outcome",
                &["feature", "outcome"]
            )
            .expect("Failed to register annotate_batches_total"),

            annotated_items: register_int_counter_vec!(
                "ezkonnect_annotated_items_total",
                "Workloads whose annotations were confirmed, by feature",
                &["feature"]
            )
            .expect("Failed to register annotated_items_total"),

            confirmation_latency_seconds: register_histogram_vec!(
                "ezkonnect_confirmation_latency_seconds",
                "Time from workload update to observed custom resource change",
                &["feature"],
                CONFIRMATION_BUCKETS.to_vec()
            )
            .expect("Failed to register confirmation_latency_seconds"),

            confirmation_timeouts: register_int_counter_vec!(
                "ezkonnect_confirmation_timeouts_total",
                "Items whose change was not confirmed before the deadline",
                &["feature"]
            )
            .expect("Failed to register confirmation_timeouts_total"),

            projected_records: register_int_gauge!(
                "ezkonnect_projected_records",
                "Records returned by the most recent state read"
            )
            .expect("Failed to register projected_records"),

            skipped_resources: register_int_counter!(
                "ezkonnect_skipped_resources_total",
                "InstrumentedApplication resources skipped because they could not be decoded"
            )
            .expect("Failed to register skipped_resources_total"),
        }
    }
}

/// Lightweight handle to the process-wide metrics.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ServerMetrics {
    _private: (),
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ServerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ServerMetricsInner {
        GLOBAL_METRICS.get_or_init(ServerMetricsInner::new)
    }

    /// `outcome` is one of `ok`, `invalid`, `cluster_error`, `timeout`
    pub fn inc_annotate_batch(&self, feature: &str, outcome: &str) {
        self.inner()
            .annotate_batches
            .with_label_values(&[feature, outcome])
            .inc();
    }

    pub fn observe_confirmation(&self, feature: &str, elapsed: Duration) {
        self.inner().annotated_items.with_label_values(&[feature]).inc();
        self.inner()
            .confirmation_latency_seconds
            .with_label_values(&[feature])
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_confirmation_timeout(&self, feature: &str) {
        self.inner()
            .confirmation_timeouts
            .with_label_values(&[feature])
            .inc();
    }

    pub fn set_projected_records(&self, count: usize) {
        self.inner().projected_records.set(count as i64);
    }

    pub fn inc_skipped_resources(&self, count: usize) {
        self.inner().skipped_resources.inc_by(count as u64);
    }
}

/// Structured logger for server events
///
/// Every event carries the `instance` field so logs from several replicas
/// can be told apart.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, port: u16, request_timeout: Duration) {
        info!(
            event = "server_started",
            instance = %self.instance,
            version = %version,
            port = port,
            request_timeout_secs = request_timeout.as_secs(),
            "Ezkonnect server started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "server_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Ezkonnect server shutting down"
        );
    }

    pub fn log_workload_annotated(
        &self,
        feature: &str,
        kind: &str,
        namespace: &str,
        name: &str,
        changed_keys: &[&str],
    ) {
        info!(
            event = "workload_annotated",
            instance = %self.instance,
            feature = %feature,
            controller_kind = %kind,
            namespace = %namespace,
            name = %name,
            keys = ?changed_keys,
            "Updated pod template annotations"
        );
    }

    pub fn log_confirmed(&self, feature: &str, namespace: &str, name: &str, elapsed: Duration) {
        info!(
            event = "annotation_confirmed",
            instance = %self.instance,
            feature = %feature,
            namespace = %namespace,
            name = %name,
            elapsed_ms = elapsed.as_millis() as u64,
            "Instrumented application reflected the change"
        );
    }

    pub fn log_confirmation_timeout(&self, feature: &str, namespace: &str, name: &str) {
        error!(
            event = "confirmation_timeout",
            instance = %self.instance,
            feature = %feature,
            namespace = %namespace,
            name = %name,
            "Timeout while updating the instrumentation status"
        );
    }

    pub fn log_state_projected(&self, resources: usize, records: usize, skipped: &[String]) {
        if skipped.is_empty() {
            info!(
                event = "state_projected",
                instance = %self.instance,
                resources = resources,
                records = records,
                "Projected instrumented application state"
            );
        } else {
            warn!(
                event = "state_projected",
                instance = %self.instance,
                resources = resources,
                records = records,
                skipped = ?skipped,
                "Projected instrumented application state, some resources could not be decoded"
            );
        }
    }
}
