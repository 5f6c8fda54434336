use thiserror::Error;

/// Result type for breakwater operations
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Errors raised by the resilience layer itself.
///
/// Work wrapped by [`execute`](crate::circuit_breaker::execute) keeps its own error type; these
/// variants reach the caller through `From<ResilienceError>` on that type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    #[error("circuit breaker '{name}' is open")]
    CircuitBreakerOpen { name: String },

    #[error("context canceled")]
    ContextCanceled,

    #[error("context deadline exceeded")]
    ContextDeadlineExceeded,

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("panic in {operation}: {message}")]
    Panic { operation: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ResilienceError {
    /// Build the rejection returned while a breaker is open
    pub fn circuit_open(name: impl Into<String>) -> Self {
        ResilienceError::CircuitBreakerOpen { name: name.into() }
    }

    /// True if the call was rejected by an open breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitBreakerOpen { .. })
    }

    /// True for caller cancellation or deadline expiry
    pub fn is_context_error(&self) -> bool {
        matches!(
            self,
            ResilienceError::ContextCanceled | ResilienceError::ContextDeadlineExceeded
        )
    }

    /// True if the error was converted from a captured panic
    pub fn is_panic(&self) -> bool {
        matches!(self, ResilienceError::Panic { .. })
    }
}
