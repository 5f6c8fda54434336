use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "breakwater=debug";

/// Initialize the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set. `json` switches from compact text output to
/// one JSON object per event.
pub fn init_tracing(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }

    info!(json, "Tracing initialized");
}
