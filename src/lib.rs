//! Circuit breaking, panic recovery and rate-limited failure logging for calls to unreliable
//! dependencies.

pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod rate_limit;
pub mod recovery;

pub use circuit_breaker::{
    build_breaker, execute, execute_with_fallback, Breaker, BreakerConfig, BreakerRegistry,
    BreakerStrategy, CircuitBreaker, CircuitState, ThresholdBreaker,
};
pub use config::ResilienceConfig;
pub use context::CallContext;
pub use error::{ResilienceError, Result};
pub use observability::init_tracing;
pub use recovery::{RecoveryHandler, RecoveryOptions};
