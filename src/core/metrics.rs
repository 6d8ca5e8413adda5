// src/core/metrics.rs

//! Defines and registers Prometheus metrics for session monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// The number of response expectations currently waiting for a frame.
    pub static ref PENDING_EXPECTATIONS: Gauge =
        register_gauge!("furbyctl_pending_expectations", "Number of outstanding response expectations.").unwrap();
    /// A boolean gauge indicating if a device session is connected.
    pub static ref SESSION_CONNECTED: Gauge =
        register_gauge!("furbyctl_session_connected", "Indicates if a device session is connected (1 for true, 0 for false).").unwrap();


    // --- Counters ---
    /// The total number of successful characteristic writes, labeled by command kind.
    pub static ref COMMANDS_WRITTEN_TOTAL: CounterVec =
        register_counter_vec!("furbyctl_commands_written_total", "Total number of commands written to the device.", &["kind"]).unwrap();
    /// The total number of failed characteristic writes.
    pub static ref WRITE_FAILURES_TOTAL: Counter =
        register_counter!("furbyctl_write_failures_total", "Total number of failed characteristic writes.").unwrap();
    /// The total number of notification frames received from the device.
    pub static ref FRAMES_RECEIVED_TOTAL: Counter =
        register_counter!("furbyctl_frames_received_total", "Total number of notification frames received.").unwrap();
    /// Frames that did not complete any pending expectation.
    pub static ref FRAMES_UNMATCHED_TOTAL: Counter =
        register_counter!("furbyctl_frames_unmatched_total", "Total number of notification frames that matched no expectation.").unwrap();
    /// Terminal states reached by response expectations.
    pub static ref EXPECTATIONS_TOTAL: CounterVec =
        register_counter_vec!("furbyctl_expectations_total", "Response expectations by terminal outcome.", &["outcome"]).unwrap();
    /// Keep-alive attempts, labeled by result.
    pub static ref KEEPALIVES_TOTAL: CounterVec =
        register_counter_vec!("furbyctl_keepalives_total", "Keep-alive attempts by result.", &["result"]).unwrap();


    // --- Histograms ---
    /// Round-trip time between a write and its correlated notification.
    pub static ref RESPONSE_LATENCY_SECONDS: Histogram =
        register_histogram!("furbyctl_response_latency_seconds", "Latency between a write and its matching notification in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}
