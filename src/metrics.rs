//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Batcher inbox depth and group deliveries
//! - Processor failures
//! - Outbound attempts and retries
//! - Terminal request outcomes
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `dispatch_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state,
//! histograms track distributions.
//!
//! The core only records; wiring an exporter is the daemon's business.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record the current batcher inbox depth.
pub fn record_inbox_depth(depth: usize) {
    gauge!("dispatch_batcher_inbox_depth").set(depth as f64);
}

/// Record a delivered group and how long the processor took.
pub fn record_group_delivered(group_size: usize, latency: Duration) {
    counter!("dispatch_batcher_groups_total").increment(1);
    counter!("dispatch_batcher_items_total").increment(group_size as u64);
    histogram!("dispatch_batcher_process_duration_seconds").record(latency.as_secs_f64());
}

/// Record a processor failure (the group is dropped, not re-enqueued).
pub fn record_process_failure() {
    counter!("dispatch_batcher_process_failures_total").increment(1);
}

/// Record items discarded by `clear()`.
pub fn record_items_cleared(count: usize) {
    counter!("dispatch_batcher_cleared_total").increment(count as u64);
}

/// Record one outbound attempt with its outcome status label.
///
/// `status` is "ok", "http_error", or "io_error".
pub fn record_attempt(status: &'static str) {
    counter!("dispatch_request_attempts_total", "status" => status).increment(1);
}

/// Record a scheduled retry and its backoff delay.
pub fn record_retry_scheduled(retry: u32, delay: Duration) {
    counter!("dispatch_request_retries_total").increment(1);
    histogram!("dispatch_request_retry_delay_seconds").record(delay.as_secs_f64());
    counter!("dispatch_request_retry_by_attempt_total", "attempt" => retry.to_string()).increment(1);
}

/// Record a terminal request outcome.
///
/// `outcome` is "success", "permanent", "exhausted", or "shutdown".
pub fn record_terminal(outcome: &'static str) {
    counter!("dispatch_request_terminal_total", "outcome" => outcome).increment(1);
}
