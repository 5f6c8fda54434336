//! Circuit breaking for calls to a single dependency.
//!
//! Two trip models share the [`Breaker`] trait:
//!
//! - [`CircuitBreaker`]: rate-based. Trips once the failure count reaches the volume threshold
//!   and the failure ratio reaches the error threshold, then probes through half-open.
//! - [`ThresholdBreaker`]: binary. Trips on a plain failure count, cools down for a fixed
//!   period, then lets one optimistic call through.
//!
//! An absent breaker (`None`) means circuit breaking is disabled: every helper in this module
//! and both [`execute`] wrappers accept `Option<&dyn Breaker>` and treat `None` as an always
//! closed circuit.
//!
//! # Example
//!
//! ```rust,no_run
//! use breakwater::circuit_breaker::{build_breaker, execute, BreakerConfig};
//! use breakwater::context::CallContext;
//! use breakwater::error::ResilienceError;
//!
//! #[tokio::main]
//! async fn main() {
//!     let breaker = build_breaker("users-db", &BreakerConfig::default());
//!     let ctx = CallContext::new();
//!
//!     let rows: Result<u32, ResilienceError> =
//!         execute(&ctx, breaker.as_deref(), "count_users", || async { Ok(42) }).await;
//!     assert_eq!(rows.unwrap(), 42);
//! }
//! ```

pub mod breaker;
pub mod execute;
pub mod registry;
pub mod threshold;
pub mod types;

pub use breaker::CircuitBreaker;
pub use execute::{execute, execute_with_fallback};
pub use registry::BreakerRegistry;
pub use threshold::ThresholdBreaker;
pub use types::{BreakerConfig, BreakerMetrics, BreakerStrategy, CircuitState};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Admission and outcome contract shared by both trip models
#[async_trait]
pub trait Breaker: Send + Sync + fmt::Debug {
    /// Name of the protected dependency
    fn name(&self) -> &str;

    /// Decide whether the next call may reach the dependency.
    ///
    /// May move an open circuit to half-open when its sleep window has elapsed.
    async fn allow_request(&self) -> bool;

    /// Feed the outcome of an admitted call back into the breaker.
    ///
    /// `None` records a success, `Some(err)` a failure.
    async fn update_state(&self, error: Option<&(dyn fmt::Display + Send + Sync)>);

    /// Record a failure from a synchronous context such as `Drop`.
    ///
    /// Returns false, recording nothing, if the state lock is currently held.
    fn try_record_failure(&self, reason: &(dyn fmt::Display + Send + Sync)) -> bool;

    async fn state(&self) -> CircuitState;

    async fn failure_count(&self) -> u32;

    /// Force the circuit closed and forget all failures
    async fn reset(&self);

    async fn metrics(&self) -> BreakerMetrics;
}

/// Build the breaker selected by `config.strategy`, or `None` when the config is disabled
pub fn build_breaker(name: &str, config: &BreakerConfig) -> Option<Arc<dyn Breaker>> {
    if !config.enabled {
        return None;
    }

    let config = config.clone().normalized();
    let breaker: Arc<dyn Breaker> = match config.strategy {
        BreakerStrategy::RateBased => Arc::new(CircuitBreaker::new(name.to_string(), config)),
        BreakerStrategy::Threshold => Arc::new(ThresholdBreaker::new(
            name.to_string(),
            config.volume_threshold,
            config.sleep_window(),
        )),
    };
    Some(breaker)
}

/// Admission check that treats a missing breaker as disabled
pub async fn allow_request(breaker: Option<&dyn Breaker>) -> bool {
    match breaker {
        Some(breaker) => breaker.allow_request().await,
        None => true,
    }
}

/// State query that reports `Closed` for a missing breaker
pub async fn state_of(breaker: Option<&dyn Breaker>) -> CircuitState {
    match breaker {
        Some(breaker) => breaker.state().await,
        None => CircuitState::Closed,
    }
}

/// Reset that is a no-op for a missing breaker
pub async fn reset(breaker: Option<&dyn Breaker>) {
    if let Some(breaker) = breaker {
        breaker.reset().await;
    }
}
