use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Fixed-interval gate: at most one permit per interval, never blocking.
///
/// Used to throttle failure logging during failure storms. The first check always passes.
pub struct LogRateLimiter {
    limiter: GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    interval: Duration,
}

impl LogRateLimiter {
    /// Create a limiter that replenishes one permit per `interval`
    pub fn new(interval: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let quota = Quota::with_period(interval)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);

        debug!(interval_ms = interval.as_millis() as u64, "Creating log rate limiter");

        Self {
            limiter: GovernorRateLimiter::direct(quota),
            interval,
        }
    }

    /// Take the permit if one is available
    pub fn allow(&self) -> bool {
        self.limiter.check().is_ok()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl fmt::Debug for LogRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogRateLimiter")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_check_passes_then_throttles() {
        let limiter = LogRateLimiter::new(Duration::from_secs(3600));

        assert!(limiter.allow());
        for _ in 0..10 {
            assert!(!limiter.allow());
        }
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let limiter = LogRateLimiter::new(Duration::ZERO);
        assert_eq!(limiter.interval(), MIN_INTERVAL);
        assert!(limiter.allow());
    }

    #[tokio::test]
    async fn test_permit_replenishes_after_interval() {
        let limiter = LogRateLimiter::new(Duration::from_millis(50));

        assert!(limiter.allow());
        assert!(!limiter.allow());

        // Real clock: governor does not follow tokio's paused time
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(limiter.allow());
        assert!(!limiter.allow());
    }
}
