use crate::circuit_breaker::CircuitState;
use crate::error::{ResilienceError, Result};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const CIRCUIT_STATE: &str = "circuit_breaker_state";
pub const CIRCUIT_TRANSITIONS: &str = "circuit_breaker_transitions_total";
pub const CIRCUIT_REJECTIONS: &str = "circuit_breaker_rejections_total";
pub const CIRCUIT_CALLS: &str = "circuit_breaker_calls_total";
pub const CIRCUIT_CALL_DURATION: &str = "circuit_breaker_call_duration_seconds";
pub const RECOVERY_PANICS: &str = "recovery_panics_total";
pub const RECOVERY_LOGS_SUPPRESSED: &str = "recovery_logs_suppressed_total";

/// Prometheus recorder installed for the process
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the Prometheus recorder and describe all metrics.
    ///
    /// Fails if a global recorder is already installed.
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            ResilienceError::Config(format!("Failed to install metrics recorder: {}", e))
        })?;

        describe_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Register descriptions for every metric this crate emits
pub fn describe_metrics() {
    describe_gauge!(
        CIRCUIT_STATE,
        "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
    );
    describe_counter!(
        CIRCUIT_TRANSITIONS,
        "Total number of circuit breaker state transitions"
    );
    describe_counter!(
        CIRCUIT_REJECTIONS,
        "Total number of calls rejected by an open circuit"
    );
    describe_counter!(CIRCUIT_CALLS, "Total number of guarded calls by result");
    describe_histogram!(
        CIRCUIT_CALL_DURATION,
        "Guarded call latencies in seconds"
    );
    describe_counter!(
        RECOVERY_PANICS,
        "Total number of panics converted to errors"
    );
    describe_counter!(
        RECOVERY_LOGS_SUPPRESSED,
        "Total number of failure logs dropped by the rate limiter"
    );

    debug!("All metrics registered with descriptions");
}

/// Record a state transition and the new state gauge
pub fn record_transition(circuit: &str, from: CircuitState, to: CircuitState) {
    let labels = [
        ("circuit", circuit.to_string()),
        ("from", from.to_string()),
        ("to", to.to_string()),
    ];
    counter!(CIRCUIT_TRANSITIONS, &labels).increment(1);
    record_state(circuit, to);
}

pub fn record_state(circuit: &str, state: CircuitState) {
    let labels = [("circuit", circuit.to_string())];
    gauge!(CIRCUIT_STATE, &labels).set(state.as_gauge());
}

pub fn record_rejection(circuit: &str) {
    let labels = [("circuit", circuit.to_string())];
    counter!(CIRCUIT_REJECTIONS, &labels).increment(1);
}

/// Record the outcome and latency of a call that was admitted
pub fn record_call(circuit: &str, operation: &str, success: bool, duration: Duration) {
    let labels = [
        ("circuit", circuit.to_string()),
        ("operation", operation.to_string()),
        ("result", result_label(success).to_string()),
    ];
    counter!(CIRCUIT_CALLS, &labels).increment(1);
    histogram!(CIRCUIT_CALL_DURATION, &labels).record(duration.as_secs_f64());
}

pub fn record_panic(operation: &str) {
    let labels = [("operation", operation.to_string())];
    counter!(RECOVERY_PANICS, &labels).increment(1);
}

pub fn record_log_suppressed(operation: &str) {
    let labels = [("operation", operation.to_string())];
    counter!(RECOVERY_LOGS_SUPPRESSED, &labels).increment(1);
}

pub(crate) fn result_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}
