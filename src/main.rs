use anyhow::Context;
use breakwater::circuit_breaker::execute_with_fallback;
use breakwater::metrics::MetricsService;
use breakwater::{
    init_tracing, BreakerRegistry, CallContext, RecoveryHandler, RecoveryOptions,
    ResilienceConfig, ResilienceError,
};
use std::env;
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::info;

const ROUNDS: u32 = 4;
const CALLS_PER_ROUND: u32 = 10;

/// Simulated dependency that fails its first `outage` calls, then recovers
struct FlakyInventory {
    calls: AtomicU32,
    outage: u32,
}

impl FlakyInventory {
    async fn stock_level(&self, sku: &str) -> Result<u32, ResilienceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;

        if call < self.outage {
            Err(ResilienceError::ServiceUnavailable(format!(
                "stock lookup for {} timed out",
                sku
            )))
        } else {
            Ok(sku.len() as u32 * 10)
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    init_tracing(env::var_os("BREAKWATER_LOG_JSON").is_some());

    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/breakwater.yaml".to_string());

    // Load configuration
    let config = match ResilienceConfig::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            eprintln!("Usage: breakwater [config_file]");
            process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        eprintln!("breakwater error: {:#}", e);
        process::exit(1);
    }
}

async fn run(config: ResilienceConfig) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;

    let metrics = MetricsService::new().context("failed to start metrics")?;
    let registry = BreakerRegistry::from_config(&config);
    let recovery = RecoveryHandler::new(RecoveryOptions::from(&config.recovery));
    let ctx = CallContext::new();

    let inventory = FlakyInventory {
        calls: AtomicU32::new(0),
        outage: 4,
    };
    let breaker = registry.get("inventory");
    let sleep_window = registry.config_for("inventory").sleep_window();

    for round in 1..=ROUNDS {
        let fallbacks = AtomicU32::new(0);

        for i in 0..CALLS_PER_ROUND {
            let sku = format!("sku-{}", i);
            let level: Result<u32, ResilienceError> = recovery
                .with_recovery(&ctx, "stock_level", || {
                    execute_with_fallback(
                        &ctx,
                        breaker.as_deref(),
                        "stock_level",
                        || inventory.stock_level(&sku),
                        |_err: ResilienceError| async {
                            fallbacks.fetch_add(1, Ordering::SeqCst);
                            Ok(0)
                        },
                    )
                })
                .await;
            level.context("stock level lookup failed")?;
        }

        println!(
            "round {}: state={} fallbacks={}",
            round,
            registry.state("inventory").await,
            fallbacks.load(Ordering::SeqCst)
        );

        tokio::time::sleep(sleep_window + Duration::from_millis(50)).await;
    }

    // Panics in guarded work surface as errors and count against the breaker
    let pricing = registry.get("pricing");
    for _ in 0..3 {
        let quote: Result<u32, ResilienceError> = recovery
            .execute(&ctx, pricing.as_deref(), "quote", || async {
                let prices: Vec<u32> = Vec::new();
                Ok(prices[0])
            })
            .await;
        if let Err(e) = quote {
            println!("pricing: {}", e);
        }
    }

    // Disabled breakers pass straight through
    let audit = registry.get("audit");
    info!(enabled = audit.is_some(), "Audit breaker");

    let snapshot: serde_json::Map<String, serde_json::Value> = registry
        .all_metrics()
        .await
        .into_iter()
        .map(|(name, counts, state)| {
            (
                name,
                serde_json::json!({ "state": state, "metrics": counts }),
            )
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    println!("{}", metrics.render());

    Ok(())
}
