use std::fmt;
use tracing::{error, info, warn};

/// One structured log record handed to an [`EventLogger`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogEvent<'a> {
    /// Breaker guarding the call, when there is one
    pub breaker: Option<&'a str>,
    pub operation: &'a str,
    pub message: &'a str,
    pub error: Option<&'a str>,
}

impl<'a> LogEvent<'a> {
    pub fn new(operation: &'a str, message: &'a str) -> Self {
        Self {
            breaker: None,
            operation,
            message,
            error: None,
        }
    }

    pub fn with_breaker(mut self, breaker: &'a str) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_error(mut self, error: &'a str) -> Self {
        self.error = Some(error);
        self
    }
}

/// Sink for failure logs emitted by the recovery layer
pub trait EventLogger: Send + Sync + fmt::Debug {
    fn info(&self, event: &LogEvent<'_>);
    fn warn(&self, event: &LogEvent<'_>);
    fn error(&self, event: &LogEvent<'_>);
}

/// Forwards events to the `tracing` subscriber installed by the caller
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl EventLogger for TracingLogger {
    fn info(&self, event: &LogEvent<'_>) {
        info!(
            breaker = event.breaker,
            operation = event.operation,
            error = event.error,
            "{}",
            event.message
        );
    }

    fn warn(&self, event: &LogEvent<'_>) {
        warn!(
            breaker = event.breaker,
            operation = event.operation,
            error = event.error,
            "{}",
            event.message
        );
    }

    fn error(&self, event: &LogEvent<'_>) {
        error!(
            breaker = event.breaker,
            operation = event.operation,
            error = event.error,
            "{}",
            event.message
        );
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl EventLogger for NoopLogger {
    fn info(&self, _event: &LogEvent<'_>) {}
    fn warn(&self, _event: &LogEvent<'_>) {}
    fn error(&self, _event: &LogEvent<'_>) {}
}
