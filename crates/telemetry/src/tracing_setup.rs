//! Tracing setup for structured logging.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Initialize tracing with an explicit filter.
///
/// `RUST_LOG` wins over the supplied filter when set. With `json` the
/// formatter emits one JSON object per event, suitable for log shippers.
pub fn init_tracing(filter: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    } else {
        let fmt_layer = fmt::layer().with_target(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    tracing::info!(filter = filter, "Tracing initialized");
}

/// Initialize tracing from environment variables.
///
/// `RUST_LOG` controls the filter (default `info`), `LOG_JSON=1` switches
/// to JSON output.
pub fn init_tracing_from_env() {
    let json = std::env::var("LOG_JSON")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    init_tracing(&filter, json);
}
