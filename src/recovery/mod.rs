//! Panic capture and rate-limited failure logging.
//!
//! [`RecoveryHandler::with_recovery`] turns a panic inside the wrapped future into
//! [`ResilienceError::Panic`] and logs failures through an [`EventLogger`]. A
//! [`LogRateLimiter`] throttles the logs. Failures are always returned to the caller; only the
//! logging is throttled.

pub mod logger;

pub use logger::{EventLogger, LogEvent, NoopLogger, TracingLogger};

use crate::circuit_breaker::{self, execute, Breaker};
use crate::context::CallContext;
use crate::error::ResilienceError;
use crate::metrics;
use crate::rate_limit::LogRateLimiter;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Serializable recovery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySettings {
    /// Minimum spacing between two failure logs, in milliseconds
    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,
}

fn default_log_interval_ms() -> u64 {
    1000
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            log_interval_ms: default_log_interval_ms(),
        }
    }
}

impl RecoverySettings {
    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms)
    }
}

/// Builder for a [`RecoveryHandler`]
#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    log_interval: Duration,
    logger: Option<Arc<dyn EventLogger>>,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            log_interval: Duration::from_millis(default_log_interval_ms()),
            logger: None,
        }
    }
}

impl RecoveryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_interval(mut self, log_interval: Duration) -> Self {
        self.log_interval = log_interval;
        self
    }

    /// Logger receiving failure events; [`TracingLogger`] when unset
    pub fn with_logger(mut self, logger: Arc<dyn EventLogger>) -> Self {
        self.logger = Some(logger);
        self
    }
}

impl From<&RecoverySettings> for RecoveryOptions {
    fn from(settings: &RecoverySettings) -> Self {
        Self::new().with_log_interval(settings.log_interval())
    }
}

/// Converts panics into errors and logs failures without flooding the logger
#[derive(Debug)]
pub struct RecoveryHandler {
    logger: Arc<dyn EventLogger>,
    limiter: LogRateLimiter,
}

impl Default for RecoveryHandler {
    fn default() -> Self {
        Self::new(RecoveryOptions::default())
    }
}

impl RecoveryHandler {
    pub fn new(options: RecoveryOptions) -> Self {
        Self {
            logger: options.logger.unwrap_or_else(|| Arc::new(TracingLogger)),
            limiter: LogRateLimiter::new(options.log_interval),
        }
    }

    pub fn log_interval(&self) -> Duration {
        self.limiter.interval()
    }

    /// Run `f`, converting a panic into an error and logging any failure.
    ///
    /// A done context returns its cancellation error without running `f` or logging.
    pub async fn with_recovery<T, E, F, Fut>(
        &self,
        ctx: &CallContext,
        operation: &str,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ResilienceError> + fmt::Display,
    {
        if let Some(err) = ctx.err() {
            debug!(operation, error = %err, "Context done, skipping recovered call");
            return Err(err.into());
        }

        match catch_panic(operation, f).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                self.log_failure(None, operation, &err, false);
                Err(err)
            }
            Err(panic) => {
                self.log_failure(None, operation, &panic, true);
                Err(panic.into())
            }
        }
    }

    /// Full guarded call: recovery around [`execute`], with panics counted by the breaker.
    ///
    /// Rejections and failures are logged like in [`with_recovery`](Self::with_recovery), tagged
    /// with the breaker name. A state change observed across the call is reported through
    /// [`EventLogger::info`] without rate limiting.
    pub async fn execute<T, E, F, Fut>(
        &self,
        ctx: &CallContext,
        breaker: Option<&dyn Breaker>,
        operation: &str,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ResilienceError> + fmt::Display + Send + Sync,
    {
        if let Some(err) = ctx.err() {
            debug!(operation, error = %err, "Context done, skipping recovered call");
            return Err(err.into());
        }

        let breaker_name = breaker.map(|b| b.name());
        let before = circuit_breaker::state_of(breaker).await;

        let panicked = AtomicBool::new(false);
        let guarded = catch_panic(operation, || {
            execute(ctx, breaker, operation, || async {
                match catch_panic(operation, work).await {
                    Ok(result) => result,
                    Err(panic) => {
                        panicked.store(true, Ordering::Relaxed);
                        Err(panic.into())
                    }
                }
            })
        })
        .await;

        let result = guarded.unwrap_or_else(|panic| {
            panicked.store(true, Ordering::Relaxed);
            Err(panic.into())
        });
        if let Some(name) = breaker_name {
            let after = circuit_breaker::state_of(breaker).await;
            if after != before {
                let message =
                    format!("Circuit breaker state changed from {} to {}", before, after);
                self.logger
                    .info(&LogEvent::new(operation, &message).with_breaker(name));
            }
        }

        if let Err(err) = &result {
            self.log_failure(
                breaker_name,
                operation,
                err,
                panicked.load(Ordering::Relaxed),
            );
        }
        result
    }

    fn log_failure(
        &self,
        breaker: Option<&str>,
        operation: &str,
        err: &dyn fmt::Display,
        panicked: bool,
    ) {
        if !self.limiter.allow() {
            metrics::record_log_suppressed(operation);
            return;
        }

        let error = err.to_string();
        let message = if panicked {
            "Recovered from panic"
        } else {
            "Operation failed"
        };
        let mut event = LogEvent::new(operation, message).with_error(&error);
        if let Some(breaker) = breaker {
            event = event.with_breaker(breaker);
        }

        if panicked {
            self.logger.error(&event);
        } else {
            self.logger.warn(&event);
        }
    }
}

/// Await the future built by `f`, turning a panic at build or poll time into an error
pub async fn catch_panic<F, Fut>(
    operation: &str,
    f: F,
) -> Result<Fut::Output, ResilienceError>
where
    F: FnOnce() -> Fut,
    Fut: Future,
{
    AssertUnwindSafe(async move { f().await })
        .catch_unwind()
        .await
        .map_err(|payload| {
            metrics::record_panic(operation);
            ResilienceError::Panic {
                operation: operation.to_string(),
                message: panic_message(payload.as_ref()),
            }
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
