//! Endpoint observability metrics
//!
//! Prometheus-compatible metrics for RPC traffic:
//! - Outbound calls and their outcomes, per endpoint
//! - Inbound requests and dropped packets
//! - Dispatch queue depth, per endpoint and worker
//! - Call round-trip duration

use std::time::Instant;

/// Record an outbound call being issued
pub fn record_call_issued(endpoint: &str) {
    metrics::counter!(
        "cascade_rpc_calls_total",
        "endpoint" => endpoint.to_string(),
    )
    .increment(1);
}

/// Record a completed call outcome
pub fn record_call_completed(endpoint: &str, status: &'static str) {
    metrics::counter!(
        "cascade_rpc_responses_total",
        "endpoint" => endpoint.to_string(),
        "status" => status,
    )
    .increment(1);
}

/// Record an inbound request accepted onto a dispatch queue
pub fn record_request_enqueued(endpoint: &str) {
    metrics::counter!(
        "cascade_rpc_inbound_total",
        "endpoint" => endpoint.to_string(),
    )
    .increment(1);
}

/// Record an inbound packet dropped at the member boundary
pub fn record_packet_dropped(reason: &'static str) {
    metrics::counter!(
        "cascade_rpc_dropped_total",
        "reason" => reason,
    )
    .increment(1);
}

/// Record the depth of one dispatch queue
pub fn record_queue_depth(endpoint: &str, worker: usize, depth: usize) {
    metrics::gauge!(
        "cascade_rpc_queue_depth",
        "endpoint" => endpoint.to_string(),
        "worker" => worker.to_string(),
    )
    .set(depth as f64);
}

/// Times one call round trip.
///
/// Outcome counters are recorded where the call settles; the timer only
/// contributes the duration histogram and the error breakdown.
pub struct CallTimer {
    endpoint: String,
    start: Instant,
}

impl CallTimer {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            start: Instant::now(),
        }
    }

    pub fn success(self) {
        self.observe();
    }

    pub fn error(self, error_type: &'static str) {
        metrics::counter!(
            "cascade_rpc_call_errors_total",
            "endpoint" => self.endpoint.clone(),
            "error_type" => error_type,
        )
        .increment(1);
        self.observe();
    }

    fn observe(self) {
        metrics::histogram!(
            "cascade_rpc_call_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}
