use super::breaker::Counters;
use super::types::{BreakerMetrics, CircuitState};
use super::Breaker;
use crate::context::CallContext;
use crate::error::ResilienceError;
use crate::metrics;
use crate::recovery::catch_panic;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Breaker that trips on a plain failure count and cools down for a fixed period.
///
/// After the cooldown the failure count is cleared and calls are admitted again. The first
/// outcome after that decides: a failure re-opens the circuit at once, a success closes it.
#[derive(Debug)]
pub struct ThresholdBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    state: RwLock<State>,
    counters: Counters,
}

#[derive(Debug, Default)]
struct State {
    failures: u32,
    open_until: Option<Instant>,
    /// Set once the cooldown has expired, until the next outcome
    probing: bool,
}

impl State {
    fn circuit_state(&self) -> CircuitState {
        if self.open_until.is_some() {
            CircuitState::Open
        } else if self.probing {
            CircuitState::HalfOpen
        } else {
            CircuitState::Closed
        }
    }
}

impl ThresholdBreaker {
    pub fn new(name: String, failure_threshold: u32, cooldown: Duration) -> Self {
        let failure_threshold = failure_threshold.max(1);
        let cooldown = cooldown.max(Duration::from_millis(1));
        info!(
            breaker = %name,
            failure_threshold,
            cooldown_ms = cooldown.as_millis() as u64,
            "Creating threshold breaker"
        );
        metrics::record_state(&name, CircuitState::Closed);

        Self {
            name,
            failure_threshold,
            cooldown,
            state: RwLock::new(State::default()),
            counters: Counters::default(),
        }
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// End of the current cooldown, if the circuit is open
    pub async fn open_until(&self) -> Option<Instant> {
        self.state.read().await.open_until
    }

    /// Run `work` under this breaker, converting a panic into a counted failure
    pub async fn call<T, E, F, Fut>(
        &self,
        ctx: &CallContext,
        operation: &str,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ResilienceError> + fmt::Display + Send + Sync,
    {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        if !self.allow_request().await {
            return Err(ResilienceError::circuit_open(&self.name).into());
        }

        match catch_panic(operation, work).await {
            Ok(Ok(value)) => {
                self.update_state(None).await;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.update_state(Some(&err)).await;
                Err(err)
            }
            Err(panic) => {
                self.update_state(Some(&panic)).await;
                Err(panic.into())
            }
        }
    }

    pub async fn allow_request(&self) -> bool {
        let state = self.state.read().await;
        let open_until = state.open_until;
        drop(state);

        match open_until {
            None => {
                self.counters.admitted();
                true
            }
            Some(until) if Instant::now() <= until => {
                self.reject();
                false
            }
            Some(_) => {
                let mut state = self.state.write().await;
                let open_until = state.open_until;
                match open_until {
                    Some(until) if Instant::now() <= until => {
                        drop(state);
                        self.reject();
                        return false;
                    }
                    Some(_) => {
                        state.failures = 0;
                        state.open_until = None;
                        state.probing = true;
                        self.enter(CircuitState::Open, CircuitState::HalfOpen);
                    }
                    None => {}
                }
                self.counters.admitted();
                true
            }
        }
    }

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
        self.counters.outcome(error.is_some());
        let probing = state.probing;
        state.probing = false;

        match error {
            Some(err) => {
                state.failures = state.failures.saturating_add(1);
                if state.open_until.is_some() {
                    debug!(breaker = %self.name, "Recording failure in open state");
                } else if probing {
                    warn!(breaker = %self.name, error = %err, "Probe after cooldown failed, reopening");
                    state.open_until = Some(Instant::now() + self.cooldown);
                    self.enter(CircuitState::HalfOpen, CircuitState::Open);
                } else if state.failures >= self.failure_threshold {
                    debug!(breaker = %self.name, failures = state.failures, error = %err, "Failure threshold reached");
                    state.open_until = Some(Instant::now() + self.cooldown);
                    self.enter(CircuitState::Closed, CircuitState::Open);
                }
            }
            None => {
                state.failures = 0;
                if probing {
                    self.enter(CircuitState::HalfOpen, CircuitState::Closed);
                }
            }
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.read().await.circuit_state()
    }

    pub async fn failure_count(&self) -> u32 {
        self.state.read().await.failures
    }

    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        let from = state.circuit_state();
        *state = State::default();
        if from != CircuitState::Closed {
            info!(breaker = %self.name, from = %from, "Threshold breaker reset");
            self.enter(from, CircuitState::Closed);
        }
    }

    fn reject(&self) {
        self.counters.rejected();
        metrics::record_rejection(&self.name);
        debug!(breaker = %self.name, "Threshold breaker cooling down, rejecting request");
    }

    fn enter(&self, from: CircuitState, to: CircuitState) {
        info!(breaker = %self.name, from = %from, to = %to, "Threshold breaker state transition");
        self.counters.entered(to);
        metrics::record_transition(&self.name, from, to);
    }
}

#[async_trait]
impl Breaker for ThresholdBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn allow_request(&self) -> bool {
        ThresholdBreaker::allow_request(self).await
    }

    async fn update_state(&self, error: Option<&(dyn fmt::Display + Send + Sync)>) {
        ThresholdBreaker::update_state(self, error).await
    }

    fn try_record_failure(&self, reason: &(dyn fmt::Display + Send + Sync)) -> bool {
        ThresholdBreaker::try_record_failure(self, reason)
    }

    async fn state(&self) -> CircuitState {
        ThresholdBreaker::state(self).await
    }

    async fn failure_count(&self) -> u32 {
        ThresholdBreaker::failure_count(self).await
    }

    async fn reset(&self) {
        ThresholdBreaker::reset(self).await
    }

    async fn metrics(&self) -> BreakerMetrics {
        self.counters.snapshot()
    }
}
