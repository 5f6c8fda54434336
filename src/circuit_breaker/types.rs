use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, allowing probe requests
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding used by `circuit_breaker_state`
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Which trip model a breaker uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStrategy {
    /// Trips on failure ratio once the volume threshold is reached, probes through half-open
    #[default]
    RateBased,
    /// Trips on a plain failure count and cools down for a fixed period
    Threshold,
}

/// Circuit breaker configuration.
///
/// Numeric fields are clamped to their minimums by [`BreakerConfig::normalized`] and by every
/// `with_*` setter, so a zero sleep window or volume threshold can never reach a breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// When false, no breaker is built and calls pass straight through
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub strategy: BreakerStrategy,

    /// Per-call timeout in milliseconds (reserved, not enforced)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum in-flight calls (reserved, not enforced)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,

    /// Failure ratio in [0, 1] that trips the circuit once the volume threshold is reached
    #[serde(default = "default_error_threshold")]
    pub error_threshold: f64,

    /// Minimum number of failures before the error ratio is evaluated
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold: u32,

    /// Time the circuit stays open before a probe is let through, in milliseconds
    #[serde(default = "default_sleep_window_ms")]
    pub sleep_window_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_max_concurrent() -> u32 {
    100
}

fn default_error_threshold() -> f64 {
    0.5
}

fn default_volume_threshold() -> u32 {
    20
}

fn default_sleep_window_ms() -> u64 {
    5000
}

const MIN_DURATION_MS: u64 = 1;

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis())
        .unwrap_or(u64::MAX)
        .max(MIN_DURATION_MS)
}

fn clamp_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() {
        default_error_threshold()
    } else {
        ratio.clamp(0.0, 1.0)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            strategy: BreakerStrategy::default(),
            timeout_ms: default_timeout_ms(),
            max_concurrent: default_max_concurrent(),
            error_threshold: default_error_threshold(),
            volume_threshold: default_volume_threshold(),
            sleep_window_ms: default_sleep_window_ms(),
        }
    }
}

impl BreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy with every numeric field clamped to its valid range
    pub fn normalized(mut self) -> Self {
        self.timeout_ms = self.timeout_ms.max(MIN_DURATION_MS);
        self.max_concurrent = self.max_concurrent.max(1);
        self.error_threshold = clamp_ratio(self.error_threshold);
        self.volume_threshold = self.volume_threshold.max(1);
        self.sleep_window_ms = self.sleep_window_ms.max(MIN_DURATION_MS);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_strategy(mut self, strategy: BreakerStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = duration_to_ms(timeout);
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: u32) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_error_threshold(mut self, error_threshold: f64) -> Self {
        self.error_threshold = clamp_ratio(error_threshold);
        self
    }

    pub fn with_volume_threshold(mut self, volume_threshold: u32) -> Self {
        self.volume_threshold = volume_threshold.max(1);
        self
    }

    pub fn with_sleep_window(mut self, sleep_window: Duration) -> Self {
        self.sleep_window_ms = duration_to_ms(sleep_window);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sleep_window(&self) -> Duration {
        Duration::from_millis(self.sleep_window_ms)
    }
}

/// Circuit breaker metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BreakerMetrics {
    /// Number of requests admitted
    pub total_requests: u64,
    /// Number of successful requests
    pub successful_requests: u64,
    /// Number of failed requests
    pub failed_requests: u64,
    /// Number of requests rejected (circuit open)
    pub rejected_requests: u64,
    /// Number of times circuit opened
    pub circuit_opened_count: u64,
    /// Number of times circuit closed
    pub circuit_closed_count: u64,
    /// Number of times circuit half-opened
    pub circuit_half_opened_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "Closed");
        assert_eq!(CircuitState::Open.to_string(), "Open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HalfOpen");
    }

    #[test]
    fn test_default_config() {
        let config = BreakerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.strategy, BreakerStrategy::RateBased);
        assert_eq!(config.timeout_ms, 1000);
        assert_eq!(config.max_concurrent, 100);
        assert_eq!(config.error_threshold, 0.5);
        assert_eq!(config.volume_threshold, 20);
        assert_eq!(config.sleep_window(), Duration::from_secs(5));
    }

    #[test]
    fn test_setters_clamp_to_minimums() {
        let config = BreakerConfig::new()
            .with_volume_threshold(0)
            .with_sleep_window(Duration::ZERO)
            .with_timeout(Duration::from_micros(10))
            .with_max_concurrent(0)
            .with_error_threshold(3.5);

        assert_eq!(config.volume_threshold, 1);
        assert_eq!(config.sleep_window_ms, 1);
        assert_eq!(config.timeout_ms, 1);
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.error_threshold, 1.0);
    }

    #[test]
    fn test_normalized_fixes_deserialized_zeros() {
        let config: BreakerConfig = serde_yaml::from_str(
            r#"
volume_threshold: 0
sleep_window_ms: 0
error_threshold: -0.2
"#,
        )
        .unwrap();

        let config = config.normalized();
        assert_eq!(config.volume_threshold, 1);
        assert_eq!(config.sleep_window_ms, 1);
        assert_eq!(config.error_threshold, 0.0);
    }

    #[test]
    fn test_nan_threshold_falls_back_to_default() {
        let config = BreakerConfig::new().with_error_threshold(f64::NAN);
        assert_eq!(config.error_threshold, 0.5);
    }

    #[test]
    fn test_strategy_deserializes_snake_case() {
        let config: BreakerConfig = serde_yaml::from_str("strategy: threshold").unwrap();
        assert_eq!(config.strategy, BreakerStrategy::Threshold);
    }
}
