use super::types::{BreakerConfig, BreakerMetrics, CircuitState};
use super::Breaker;
use crate::metrics;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Rate-based circuit breaker for a single dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Configuration
    config: BreakerConfig,
    /// Current state
    state: RwLock<State>,
    /// Request counters, kept outside the lock so the closed path only needs a read guard
    counters: Counters,
    /// Dependency identifier
    name: String,
}

#[derive(Debug)]
struct State {
    /// Current circuit state
    circuit_state: CircuitState,
    /// Failures since the last success or reset
    failure_count: u32,
    /// Time of the most recent failure
    last_failure: Option<Instant>,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    rejected_requests: AtomicU64,
    circuit_opened_count: AtomicU64,
    circuit_closed_count: AtomicU64,
    circuit_half_opened_count: AtomicU64,
}

impl Counters {
    pub(crate) fn admitted(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn outcome(&self, failed: bool) {
        let counter = if failed {
            &self.failed_requests
        } else {
            &self.successful_requests
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn entered(&self, state: CircuitState) {
        let counter = match state {
            CircuitState::Closed => &self.circuit_closed_count,
            CircuitState::Open => &self.circuit_opened_count,
            CircuitState::HalfOpen => &self.circuit_half_opened_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BreakerMetrics {
        BreakerMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            circuit_opened_count: self.circuit_opened_count.load(Ordering::Relaxed),
            circuit_closed_count: self.circuit_closed_count.load(Ordering::Relaxed),
            circuit_half_opened_count: self.circuit_half_opened_count.load(Ordering::Relaxed),
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: String, config: BreakerConfig) -> Self {
        let config = config.normalized();
        info!(
            breaker = %name,
            error_threshold = config.error_threshold,
            volume_threshold = config.volume_threshold,
            sleep_window_ms = config.sleep_window_ms,
            "Creating circuit breaker"
        );
        metrics::record_state(&name, CircuitState::Closed);

        Self {
            config,
            state: RwLock::new(State {
                circuit_state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
            counters: Counters::default(),
            name,
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Time of the most recent recorded failure
    pub async fn last_failure_time(&self) -> Option<Instant> {
        self.state.read().await.last_failure
    }

    /// Check if a request can proceed
    pub async fn allow_request(&self) -> bool {
        let state = self.state.read().await;
        let current = state.circuit_state;

        match current {
            CircuitState::Closed => {
                self.counters.admitted();
                true
            }
            CircuitState::HalfOpen => {
                self.counters.admitted();
                debug!(breaker = %self.name, "Allowing half-open probe request");
                true
            }
            CircuitState::Open => {
                let elapsed = self.sleep_window_elapsed(&state);
                // The read guard must be gone before the write lock is requested
                drop(state);

                if !elapsed {
                    self.reject();
                    return false;
                }

                let mut state = self.state.write().await;
                let current = state.circuit_state;
                match current {
                    CircuitState::Open if self.sleep_window_elapsed(&state) => {
                        self.transition(&mut state, CircuitState::HalfOpen);
                    }
                    CircuitState::Open => {
                        // A probe failed between our read and write, restarting the window
                        drop(state);
                        self.reject();
                        return false;
                    }
                    CircuitState::Closed | CircuitState::HalfOpen => {
                        debug!(
                            breaker = %self.name,
                            state = %current,
                            "Circuit already left open state, admitting request"
                        );
                    }
                }

                self.counters.admitted();
                true
            }
        }
    }

    /// Record the outcome of an admitted request
    pub async fn update_state(&self, error: Option<&(dyn fmt::Display + Send + Sync)>) {
        let mut state = self.state.write().await;
        self.apply_outcome(&mut state, error);
    }

    /// Record a failure without waiting for the lock; false if the lock is contended
    pub fn try_record_failure(&self, reason: &(dyn fmt::Display + Send + Sync)) -> bool {
        match self.state.try_write() {
            Ok(mut state) => {
                self.apply_outcome(&mut state, Some(reason));
                true
            }
            Err(_) => false,
        }
    }

    fn apply_outcome(&self, state: &mut State, error: Option<&(dyn fmt::Display + Send + Sync)>) {
        let current = state.circuit_state;
        self.counters.outcome(error.is_some());

        match error {
            Some(err) => {
                state.failure_count = state.failure_count.saturating_add(1);
                state.last_failure = Some(Instant::now());

                match current {
                    CircuitState::Closed => {
                        debug!(
                            breaker = %self.name,
                            failure_count = state.failure_count,
                            volume_threshold = self.config.volume_threshold,
                            error = %err,
                            "Request failed in closed state"
                        );
                        if self.should_trip(state.failure_count) {
                            self.transition(state, CircuitState::Open);
                        }
                    }
                    CircuitState::HalfOpen => {
                        warn!(
                            breaker = %self.name,
                            error = %err,
                            "Half-open probe request failed, reopening circuit"
                        );
                        self.transition(state, CircuitState::Open);
                    }
                    CircuitState::Open => {
                        // Admitted before another caller tripped the circuit
                        debug!(breaker = %self.name, "Recording failure in open state");
                    }
                }
            }
            None => match current {
                CircuitState::Closed => {
                    state.failure_count = 0;
                }
                CircuitState::HalfOpen => {
                    debug!(breaker = %self.name, "Half-open probe request succeeded");
                    state.failure_count = 0;
                    self.transition(state, CircuitState::Closed);
                }
                CircuitState::Open => {
                    debug!(breaker = %self.name, "Recording success in open state");
                }
            },
        }
    }

    /// Get current state
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.circuit_state
    }

    pub async fn failure_count(&self) -> u32 {
        self.state.read().await.failure_count
    }

    /// Force the circuit closed, e.g. after manual remediation
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.failure_count = 0;
        state.last_failure = None;

        let current = state.circuit_state;
        if current == CircuitState::Closed {
            debug!(breaker = %self.name, "Circuit breaker reset while closed");
        } else {
            info!(breaker = %self.name, from = %current, "Circuit breaker reset");
            self.transition(&mut state, CircuitState::Closed);
        }
    }

    /// Get metrics
    pub fn metrics(&self) -> BreakerMetrics {
        self.counters.snapshot()
    }

    fn should_trip(&self, failure_count: u32) -> bool {
        let volume = self.config.volume_threshold;
        failure_count >= volume
            && f64::from(failure_count) / f64::from(volume) >= self.config.error_threshold
    }

    fn sleep_window_elapsed(&self, state: &State) -> bool {
        match state.last_failure {
            Some(last_failure) => last_failure.elapsed() > self.config.sleep_window(),
            None => {
                warn!(breaker = %self.name, "Circuit open but no failure timestamp");
                true
            }
        }
    }

    fn reject(&self) {
        self.counters.rejected();
        metrics::record_rejection(&self.name);
        debug!(breaker = %self.name, "Circuit breaker open, rejecting request");
    }

    fn transition(&self, state: &mut State, to: CircuitState) {
        let from = state.circuit_state;
        info!(
            breaker = %self.name,
            from = %from,
            to = %to,
            failure_count = state.failure_count,
            "Circuit breaker state transition"
        );

        state.circuit_state = to;
        self.counters.entered(to);
        metrics::record_transition(&self.name, from, to);
    }
}

#[async_trait]
impl Breaker for CircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn allow_request(&self) -> bool {
        CircuitBreaker::allow_request(self).await
    }

    async fn update_state(&self, error: Option<&(dyn fmt::Display + Send + Sync)>) {
        CircuitBreaker::update_state(self, error).await
    }

    fn try_record_failure(&self, reason: &(dyn fmt::Display + Send + Sync)) -> bool {
        CircuitBreaker::try_record_failure(self, reason)
    }

    async fn state(&self) -> CircuitState {
        CircuitBreaker::state(self).await
    }

    async fn failure_count(&self) -> u32 {
        CircuitBreaker::failure_count(self).await
    }

    async fn reset(&self) {
        CircuitBreaker::reset(self).await
    }

    async fn metrics(&self) -> BreakerMetrics {
        CircuitBreaker::metrics(self)
    }
}
