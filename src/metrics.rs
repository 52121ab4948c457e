// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the cache worker.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `cache_worker_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for sizes
//!
//! # Labels
//! - `operation`: request surface or coordinator call name
//! - `status`: success, error, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of a request-surface operation
pub fn record_request(operation: &str, status: &str) {
    counter!(
        "cache_worker_requests_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record request latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "cache_worker_request_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// CAPACITY - Space accounting
// ═══════════════════════════════════════════════════════════════════════════

/// Set bytes currently in use (resident files + outstanding reservations)
pub fn set_used_bytes(bytes: u64) {
    gauge!("cache_worker_used_bytes").set(bytes as f64);
}

/// Set configured capacity
pub fn set_capacity_bytes(bytes: u64) {
    gauge!("cache_worker_capacity_bytes").set(bytes as f64);
}

/// Set number of resident files
pub fn set_cached_files(count: usize) {
    gauge!("cache_worker_cached_files").set(count as f64);
}

/// Set number of files pinned by at least one user lock
pub fn set_locked_files(count: usize) {
    gauge!("cache_worker_locked_files").set(count as f64);
}

/// Record a space request outcome
pub fn record_space_request(granted: bool, bytes: u64) {
    let status = if granted { "granted" } else { "denied" };
    counter!(
        "cache_worker_space_requests_total",
        "status" => status
    )
    .increment(1);
    if granted {
        counter!("cache_worker_reserved_bytes_total").increment(bytes);
    }
}

/// Record bytes a user tried to return beyond what it owned
pub fn record_over_release(bytes: u64) {
    counter!("cache_worker_over_released_bytes_total").increment(bytes);
}

// ═══════════════════════════════════════════════════════════════════════════
// EVICTION
// ═══════════════════════════════════════════════════════════════════════════

/// Record eviction event
pub fn record_eviction(bytes: u64) {
    counter!("cache_worker_evictions_total").increment(1);
    counter!("cache_worker_evicted_bytes_total").increment(bytes);
}

/// Record an eviction attempt that found no candidate
pub fn record_eviction_exhausted() {
    counter!("cache_worker_eviction_exhausted_total").increment(1);
}

/// Record pin-set fetch outcome ("success" or "fail_open")
pub fn record_pin_fetch(outcome: &str) {
    counter!(
        "cache_worker_pin_fetch_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// COORDINATOR - Outbound calls
// ═══════════════════════════════════════════════════════════════════════════

/// Record a coordinator call outcome
pub fn record_coordinator_call(operation: &str, status: &str) {
    counter!(
        "cache_worker_coordinator_calls_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record removals reported in a heartbeat
pub fn record_heartbeat_removals(count: usize) {
    histogram!("cache_worker_heartbeat_removed_files").record(count as f64);
}

/// Record removals dropped because the pending-removal queue was full
pub fn record_removals_dropped(count: usize) {
    counter!("cache_worker_removals_dropped_total").increment(count as u64);
}

/// Record circuit breaker call outcome
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "cache_worker_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// MAINTENANCE - Sessions and access tracking
// ═══════════════════════════════════════════════════════════════════════════

/// Record an access event dropped because the queue was full
pub fn record_access_dropped() {
    counter!("cache_worker_access_events_dropped_total").increment(1);
}

/// Record access events applied to the catalog in one pass
pub fn record_access_applied(count: usize) {
    counter!("cache_worker_access_events_applied_total").increment(count as u64);
}

/// Record user sessions expired in one pass
pub fn record_sessions_expired(count: usize) {
    counter!("cache_worker_sessions_expired_total").increment(count as u64);
}

/// Set number of live user sessions
pub fn set_active_sessions(count: usize) {
    gauge!("cache_worker_active_sessions").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// STARTUP
// ═══════════════════════════════════════════════════════════════════════════

/// Record startup phase duration
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "cache_worker_startup_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set worker state (for monitoring state machine transitions)
pub fn set_worker_state(state: &str) {
    counter!(
        "cache_worker_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
