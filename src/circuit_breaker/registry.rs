use super::types::{BreakerConfig, BreakerMetrics, CircuitState};
use super::{build_breaker, Breaker};
use crate::config::ResilienceConfig;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Named breakers created lazily from a default config plus per-name overrides
#[derive(Debug, Clone)]
pub struct BreakerRegistry {
    /// Breakers created so far, by dependency name
    breakers: Arc<DashMap<String, Arc<dyn Breaker>>>,
    /// Config for names without an override
    defaults: BreakerConfig,
    overrides: Arc<HashMap<String, BreakerConfig>>,
}

impl BreakerRegistry {
    pub fn new(defaults: BreakerConfig) -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
            defaults,
            overrides: Arc::new(HashMap::new()),
        }
    }

    /// Registry using the `defaults` and `breakers` sections of a loaded config
    pub fn from_config(config: &ResilienceConfig) -> Self {
        info!(
            overrides = config.breakers.len(),
            "Creating breaker registry from config"
        );
        Self {
            breakers: Arc::new(DashMap::new()),
            defaults: config.defaults.clone(),
            overrides: Arc::new(config.breakers.clone()),
        }
    }

    /// The config a breaker named `name` is (or would be) built from
    pub fn config_for(&self, name: &str) -> &BreakerConfig {
        self.overrides.get(name).unwrap_or(&self.defaults)
    }

    /// Get or create the breaker for `name`.
    ///
    /// Returns `None` when circuit breaking is disabled for that name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Breaker>> {
        if let Some(existing) = self.breakers.get(name) {
            return Some(Arc::clone(existing.value()));
        }

        let breaker = build_breaker(name, self.config_for(name))?;
        let breaker = self
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(circuit = name, "Registering circuit breaker");
                breaker
            })
            .clone();
        Some(breaker)
    }

    /// State of the breaker for `name`, `Closed` if none was created
    pub async fn state(&self, name: &str) -> CircuitState {
        match self.lookup(name) {
            Some(breaker) => breaker.state().await,
            None => CircuitState::Closed,
        }
    }

    pub async fn metrics(&self, name: &str) -> Option<BreakerMetrics> {
        match self.lookup(name) {
            Some(breaker) => Some(breaker.metrics().await),
            None => None,
        }
    }

    /// Reset the breaker for `name`; false if none was created
    pub async fn reset(&self, name: &str) -> bool {
        match self.lookup(name) {
            Some(breaker) => {
                breaker.reset().await;
                true
            }
            None => false,
        }
    }

    pub async fn reset_all(&self) {
        for breaker in self.snapshot() {
            breaker.reset().await;
        }
        info!(count = self.breakers.len(), "Reset all circuit breakers");
    }

    /// Names of all breakers created so far
    pub fn names(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }

    /// Metrics and state of every breaker, sorted by name
    pub async fn all_metrics(&self) -> Vec<(String, BreakerMetrics, CircuitState)> {
        let mut results = Vec::new();
        for breaker in self.snapshot() {
            let metrics = breaker.metrics().await;
            let state = breaker.state().await;
            results.push((breaker.name().to_string(), metrics, state));
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    // Shard guards must not be held across an await
    fn lookup(&self, name: &str) -> Option<Arc<dyn Breaker>> {
        self.breakers.get(name).map(|e| Arc::clone(e.value()))
    }

    fn snapshot(&self) -> Vec<Arc<dyn Breaker>> {
        self.breakers.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerStrategy;
    use std::time::Duration;

    fn two_strikes() -> BreakerConfig {
        BreakerConfig::new()
            .with_volume_threshold(2)
            .with_error_threshold(0.5)
    }

    #[tokio::test]
    async fn test_registry_manages_multiple_dependencies() {
        let registry = BreakerRegistry::new(two_strikes());

        let users = registry.get("users").unwrap();
        assert!(users.allow_request().await);
        users.update_state(None).await;

        let orders = registry.get("orders").unwrap();
        for _ in 0..2 {
            assert!(orders.allow_request().await);
            orders.update_state(Some(&"timeout")).await;
        }

        assert_eq!(registry.state("users").await, CircuitState::Closed);
        assert_eq!(registry.state("orders").await, CircuitState::Open);

        let names = registry.names();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"users".to_string()));
        assert!(names.contains(&"orders".to_string()));
    }

    #[tokio::test]
    async fn test_get_returns_same_instance() {
        let registry = BreakerRegistry::new(two_strikes());

        let first = registry.get("users").unwrap();
        first.update_state(Some(&"boom")).await;

        let second = registry.get("users").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.failure_count().await, 1);
    }

    #[tokio::test]
    async fn test_all_metrics_sorted_by_name() {
        let registry = BreakerRegistry::new(two_strikes());

        let b = registry.get("b-service").unwrap();
        b.allow_request().await;
        b.update_state(Some(&"boom")).await;

        let a = registry.get("a-service").unwrap();
        a.allow_request().await;
        a.update_state(None).await;

        let all = registry.all_metrics().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, "a-service");
        assert_eq!(all[0].1.successful_requests, 1);
        assert_eq!(all[1].0, "b-service");
        assert_eq!(all[1].1.failed_requests, 1);
        assert_eq!(all[1].2, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_unknown_dependency() {
        let registry = BreakerRegistry::new(BreakerConfig::default());

        assert_eq!(registry.state("nonexistent").await, CircuitState::Closed);
        assert!(registry.metrics("nonexistent").await.is_none());
        assert!(!registry.reset("nonexistent").await);
        assert!(registry.names().is_empty());
    }

    #[tokio::test]
    async fn test_reset_and_reset_all() {
        let registry = BreakerRegistry::new(two_strikes());
        for name in ["users", "orders"] {
            let breaker = registry.get(name).unwrap();
            breaker.update_state(Some(&"boom")).await;
            breaker.update_state(Some(&"boom")).await;
            assert_eq!(breaker.state().await, CircuitState::Open);
        }

        assert!(registry.reset("users").await);
        assert_eq!(registry.state("users").await, CircuitState::Closed);
        assert_eq!(registry.state("orders").await, CircuitState::Open);

        registry.reset_all().await;
        assert_eq!(registry.state("orders").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_overrides_and_disabled_entries() {
        let yaml = r#"
defaults:
  volume_threshold: 5
breakers:
  cache:
    strategy: threshold
    volume_threshold: 1
    sleep_window_ms: 60000
  audit:
    enabled: false
"#;
        let config = ResilienceConfig::from_yaml(yaml).unwrap();
        let registry = BreakerRegistry::from_config(&config);

        assert_eq!(registry.config_for("users").volume_threshold, 5);
        assert_eq!(
            registry.config_for("cache").strategy,
            BreakerStrategy::Threshold
        );
        assert_eq!(
            registry.config_for("cache").sleep_window(),
            Duration::from_secs(60)
        );

        let cache = registry.get("cache").unwrap();
        cache.update_state(Some(&"miss storm")).await;
        assert_eq!(cache.state().await, CircuitState::Open);

        assert!(registry.get("audit").is_none());
        assert!(!registry.names().contains(&"audit".to_string()));
    }
}
