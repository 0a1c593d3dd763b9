//! Prometheus metrics for the instrumentation layer
//!
//! Counters are registered lazily in the default registry. They describe
//! the health of the telemetry pipeline itself (hooks, correlation, export),
//! never the instrumented tests.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_int_counter, CounterVec, Gauge, IntCounter,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Interception Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Patches successfully applied, by hook name.
    pub static ref HOOKS_APPLIED: CounterVec = register_counter_vec!(
        "civis_hooks_applied_total",
        "Patches applied to loaded modules",
        &["hook"]
    ).expect("failed to register HOOKS_APPLIED metric");

    /// Patch strategies that failed; the original exports were kept.
    pub static ref HOOK_FAILURES: CounterVec = register_counter_vec!(
        "civis_hook_failures_total",
        "Patch strategies that failed and fell back to the original exports",
        &["hook"]
    ).expect("failed to register HOOK_FAILURES metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Span Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Spans started, by role (session, suite, test).
    pub static ref SPANS_STARTED: CounterVec = register_counter_vec!(
        "civis_spans_started_total",
        "Spans started by the correlator",
        &["role"]
    ).expect("failed to register SPANS_STARTED metric");

    /// Spans finished and handed to the exporter, by role.
    pub static ref SPANS_FINISHED: CounterVec = register_counter_vec!(
        "civis_spans_finished_total",
        "Spans finished and queued for export",
        &["role"]
    ).expect("failed to register SPANS_FINISHED metric");

    /// Events ignored because they did not fit the correlator state.
    ///
    /// Labels:
    /// - event: Event name (e.g. "test:finish")
    pub static ref CORRELATION_ANOMALIES: CounterVec = register_counter_vec!(
        "civis_correlation_anomalies_total",
        "Lifecycle events ignored by the correlator",
        &["event"]
    ).expect("failed to register CORRELATION_ANOMALIES metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Export Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Flushed batches, by outcome ("sent", "failed", "empty").
    pub static ref EXPORT_BATCHES: CounterVec = register_counter_vec!(
        "civis_export_batches_total",
        "Batches flushed to the intake by outcome",
        &["outcome"]
    ).expect("failed to register EXPORT_BATCHES metric");

    /// Spans lost because their batch could not be delivered.
    pub static ref EXPORT_SPANS_DROPPED: IntCounter = register_int_counter!(
        "civis_export_spans_dropped_total",
        "Spans dropped after a failed delivery"
    ).expect("failed to register EXPORT_SPANS_DROPPED metric");

    /// Spans currently waiting in the writer buffer.
    pub static ref EXPORT_BUFFERED_SPANS: Gauge = register_gauge!(
        "civis_export_buffered_spans",
        "Finished spans waiting for the next flush"
    ).expect("failed to register EXPORT_BUFFERED_SPANS metric");
}

/// Initialize metrics with default values.
///
/// Called during startup so gauges exist in the registry before any flush.
pub fn init() {
    EXPORT_BUFFERED_SPANS.set(0.0);
}
