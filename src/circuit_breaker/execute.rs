use super::Breaker;
use crate::context::CallContext;
use crate::error::ResilienceError;
use crate::metrics;
use std::fmt;
use std::future::Future;
use tokio::time::Instant;
use tracing::{debug, field, info_span, warn, Instrument};

enum Guarded<T, E> {
    Rejected(ResilienceError),
    Completed(Result<T, E>),
}

/// Counts an admitted call as failed if it ends without reporting an outcome,
/// either by panicking or by the caller dropping the future.
struct PendingOutcome<'a> {
    breaker: &'a dyn Breaker,
    operation: &'a str,
    reported: bool,
}

impl Drop for PendingOutcome<'_> {
    fn drop(&mut self) {
        if self.reported {
            return;
        }

        let reason = if std::thread::panicking() {
            "guarded call panicked"
        } else {
            "guarded call abandoned before completion"
        };
        if self.breaker.try_record_failure(&reason) {
            debug!(
                circuit = %self.breaker.name(),
                operation = self.operation,
                reason,
                "Recorded unfinished call as failure"
            );
        } else {
            warn!(
                circuit = %self.breaker.name(),
                operation = self.operation,
                reason,
                "Breaker busy, unfinished call not recorded"
            );
        }
    }
}

/// Run `work` under `breaker`, propagating its result unchanged.
///
/// A done context fails with its cancellation error before the breaker is consulted. An open
/// circuit fails with [`ResilienceError::CircuitBreakerOpen`] without invoking `work`. With no
/// breaker, `work` runs directly.
pub async fn execute<T, E, F, Fut>(
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
        debug!(operation, error = %err, "Context done before guarded call");
        return Err(err.into());
    }

    let Some(breaker) = breaker else {
        return work().await;
    };

    match run_guarded(breaker, operation, work).await {
        Guarded::Rejected(err) => Err(err.into()),
        Guarded::Completed(result) => result,
    }
}

/// Like [`execute`], but an open circuit or a failed `work` is answered by `fallback`.
///
/// `fallback` receives the rejection or the work's error and is never called on success.
/// A done context still fails with its cancellation error, without invoking either.
pub async fn execute_with_fallback<T, E, F, Fut, FB, FutB>(
    ctx: &CallContext,
    breaker: Option<&dyn Breaker>,
    operation: &str,
    work: F,
    fallback: FB,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    FB: FnOnce(E) -> FutB,
    FutB: Future<Output = Result<T, E>>,
    E: From<ResilienceError> + fmt::Display + Send + Sync,
{
    if let Some(err) = ctx.err() {
        debug!(operation, error = %err, "Context done before guarded call");
        return Err(err.into());
    }

    let err = match breaker {
        None => match work().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        },
        Some(breaker) => match run_guarded(breaker, operation, work).await {
            Guarded::Completed(Ok(value)) => return Ok(value),
            Guarded::Completed(Err(err)) => err,
            Guarded::Rejected(rejection) => rejection.into(),
        },
    };

    debug!(operation, error = %err, "Invoking fallback");
    fallback(err).await
}

async fn run_guarded<T, E, F, Fut>(
    breaker: &dyn Breaker,
    operation: &str,
    work: F,
) -> Guarded<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display + Send + Sync,
{
    let state = breaker.state().await;
    let span = info_span!(
        "circuit_breaker.execute",
        circuit.name = %breaker.name(),
        circuit.operation = %operation,
        circuit.state = %state,
        circuit.success = field::Empty,
        circuit.duration_ms = field::Empty,
        circuit.result = field::Empty,
    );

    if !breaker.allow_request().await {
        span.record("circuit.success", false);
        span.record("circuit.result", "rejected");
        debug!(parent: &span, "Call rejected by open circuit");
        return Guarded::Rejected(ResilienceError::circuit_open(breaker.name()));
    }

    let mut pending = PendingOutcome {
        breaker,
        operation,
        reported: false,
    };
    let start = Instant::now();
    let result = work().instrument(span.clone()).await;
    let elapsed = start.elapsed();

    let error = result.as_ref().err();
    pending.reported = true;
    breaker
        .update_state(error.map(|err| err as &(dyn fmt::Display + Send + Sync)))
        .await;

    let success = error.is_none();
    span.record("circuit.success", success);
    span.record("circuit.duration_ms", elapsed.as_millis() as u64);
    span.record("circuit.result", metrics::result_label(success));
    if let Some(err) = error {
        debug!(parent: &span, error = %err, "Guarded call failed");
    }
    metrics::record_call(breaker.name(), operation, success, elapsed);

    Guarded::Completed(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn breaker(volume_threshold: u32) -> CircuitBreaker {
        let config = BreakerConfig::new()
            .with_volume_threshold(volume_threshold)
            .with_error_threshold(1.0)
            .with_sleep_window(Duration::from_millis(500));
        CircuitBreaker::new("inventory".to_string(), config)
    }

    async fn failing(
        cb: &CircuitBreaker,
        calls: &AtomicU32,
    ) -> Result<u32, ResilienceError> {
        execute(&CallContext::new(), Some(cb), "reserve", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ResilienceError::ServiceUnavailable("inventory down".into()))
        })
        .await
    }

    #[tokio::test]
    async fn test_execute_passes_value_through() {
        let cb = breaker(3);
        let result: Result<&str, ResilienceError> =
            execute(&CallContext::new(), Some(&cb), "reserve", || async { Ok("reserved") }).await;

        assert_eq!(assert_ok!(result), "reserved");
        assert_eq!(cb.metrics().successful_requests, 1);
    }

    #[tokio::test]
    async fn test_execute_propagates_work_error_unchanged() {
        let cb = breaker(3);
        let calls = AtomicU32::new(0);

        let err = assert_err!(failing(&cb, &calls).await);
        assert!(matches!(err, ResilienceError::ServiceUnavailable(ref msg) if msg == "inventory down"));
        assert_eq!(cb.failure_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_never_invokes_work() {
        let cb = breaker(2);
        let calls = AtomicU32::new(0);

        failing(&cb, &calls).await.unwrap_err();
        failing(&cb, &calls).await.unwrap_err();
        assert_eq!(cb.state().await, CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        for _ in 0..5 {
            let err = failing(&cb, &calls).await.unwrap_err();
            assert!(err.is_circuit_open());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_breaker_runs_work_directly() {
        let calls = AtomicU32::new(0);
        for _ in 0..10 {
            let result: Result<(), ResilienceError> =
                execute(&CallContext::new(), None, "reserve", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ResilienceError::ServiceUnavailable("down".into()))
                })
                .await;
            assert!(!result.unwrap_err().is_circuit_open());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_cancelled_context_does_not_touch_breaker() {
        let cb = breaker(1);
        let calls = AtomicU32::new(0);
        let ctx = CallContext::new();
        ctx.cancel();

        let result: Result<(), ResilienceError> = execute(&ctx, Some(&cb), "reserve", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(ResilienceError::ContextCanceled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.metrics().total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_is_not_a_failure() {
        let cb = breaker(1);
        let ctx = CallContext::new().with_timeout(Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(20)).await;

        let result: Result<(), ResilienceError> =
            execute(&ctx, Some(&cb), "reserve", || async { Ok(()) }).await;

        assert!(matches!(result, Err(ResilienceError::ContextDeadlineExceeded)));
        assert_eq!(cb.failure_count().await, 0);
    }

    #[tokio::test]
    async fn test_fallback_replaces_work_error() {
        let cb = breaker(3);
        let result: Result<u32, ResilienceError> = execute_with_fallback(
            &CallContext::new(),
            Some(&cb),
            "stock_level",
            || async { Err(ResilienceError::ServiceUnavailable("down".into())) },
            |_err| async { Ok(0) },
        )
        .await;

        assert_eq!(assert_ok!(result), 0);
        assert_eq!(cb.failure_count().await, 1);
    }

    #[tokio::test]
    async fn test_fallback_not_called_on_success() {
        let cb = breaker(3);
        let fallbacks = AtomicU32::new(0);

        let result: Result<u32, ResilienceError> = execute_with_fallback(
            &CallContext::new(),
            Some(&cb),
            "stock_level",
            || async { Ok(7) },
            |_err| async {
                fallbacks.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            },
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(fallbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_receives_rejection_when_open() {
        let cb = breaker(1);
        let calls = AtomicU32::new(0);
        failing(&cb, &calls).await.unwrap_err();

        let result: Result<u32, ResilienceError> = execute_with_fallback(
            &CallContext::new(),
            Some(&cb),
            "stock_level",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            },
            |err: ResilienceError| async move {
                assert!(err.is_circuit_open());
                Ok(99)
            },
        )
        .await;

        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_work_counts_as_failure() {
        let cb = breaker(1);

        let ctx = CallContext::new();
        let outcome = crate::recovery::catch_panic("reserve", || {
            execute(&ctx, Some(&cb), "reserve", || async {
                let slots: Vec<u32> = Vec::new();
                Ok::<u32, ResilienceError>(slots[0])
            })
        })
        .await;

        assert!(outcome.unwrap_err().is_panic());
        assert_eq!(cb.failure_count().await, 1);
        assert_eq!(cb.state().await, CircuitState::Open);
        assert_eq!(cb.metrics().failed_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_half_open_call_reopens_circuit() {
        let cb = breaker(1);
        let calls = AtomicU32::new(0);
        failing(&cb, &calls).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(501)).await;

        let ctx = CallContext::new();
        let hung = execute(&ctx, Some(&cb), "reserve", || async {
            std::future::pending::<Result<(), ResilienceError>>().await
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(50), hung).await;

        assert!(timed_out.is_err());
        assert_eq!(cb.state().await, CircuitState::Open);
        assert_eq!(cb.failure_count().await, 2);
        assert!(!cb.allow_request().await);
    }

    #[tokio::test]
    async fn test_completed_call_is_not_double_counted() {
        let cb = breaker(3);
        let result: Result<(), ResilienceError> =
            execute(&CallContext::new(), Some(&cb), "reserve", || async { Ok(()) }).await;

        assert!(result.is_ok());
        let metrics = cb.metrics();
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.failed_requests, 0);
    }

    #[tokio::test]
    async fn test_fallback_without_breaker() {
        let result: Result<u32, ResilienceError> = execute_with_fallback(
            &CallContext::new(),
            None,
            "stock_level",
            || async { Err(ResilienceError::ServiceUnavailable("down".into())) },
            |_err| async { Ok(5) },
        )
        .await;

        assert_eq!(result.unwrap(), 5);
    }
}
