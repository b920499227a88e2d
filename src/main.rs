//! Trellis demo binary.
//!
//! Wires the broker and its storage engine together: lines read from stdin
//! are published into one topic, and a logging consumer group prints what
//! it receives. Useful for poking at flush/poll timing from a terminal:
//!
//! ```text
//! $ mkdir -p commitlog && cargo run -q
//! hello
//! world
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

use broker::{Broker, BrokerConfig};
use storage::{IsomorphicStorage, StorageConfig};
use telemetry::init_tracing_from_env;

/// Application configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Config {
    /// Topic the demo publishes stdin lines into.
    #[serde(default = "default_topic")]
    topic: String,
    #[serde(default = "default_partitions")]
    partitions: usize,
    /// Consumer group name for the logging subscriber.
    #[serde(default = "default_group")]
    group: String,

    #[serde(default)]
    storage: StorageConfig,

    #[serde(default)]
    broker: BrokerConfig,
}

fn default_topic() -> String {
    "lines".to_string()
}

fn default_partitions() -> usize {
    2
}

fn default_group() -> String {
    "printer".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            partitions: default_partitions(),
            group: default_group(),
            storage: StorageConfig::default(),
            broker: BrokerConfig::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting trellis v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    // The storage engine requires the commit directory to exist; create it
    // here so a fresh checkout works out of the box.
    std::fs::create_dir_all(&config.storage.commit_dir)
        .context("Failed to create commit directory")?;

    let storage = Arc::new(IsomorphicStorage::new(config.storage.clone()));
    let broker = Broker::new(storage, config.broker.clone());

    broker
        .create_topic(&config.topic, config.partitions)
        .await
        .context("Failed to create topic")?;

    let group = config.group.clone();
    let subscription = broker
        .subscribe(
            &config.topic,
            &config.group,
            Box::new(move |messages| {
                for message in &messages {
                    info!(group = %group, message = %message, "delivered");
                }
            }),
        )
        .await
        .context("Failed to subscribe")?;

    let publisher = broker
        .publish(&config.topic)
        .context("Failed to create publisher")?;

    info!(
        topic = %config.topic,
        partitions = config.partitions,
        "Reading lines from stdin, Ctrl-C to exit"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown_signal() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => publisher.send(line).await,
                Ok(None) => {
                    // stdin closed; keep serving consumers until a signal
                    shutdown_signal().await;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    }

    info!("Shutting down...");
    subscription.unsubscribe();
    broker.shutdown().await.context("Graceful shutdown failed")?;

    info!(metrics = ?telemetry::metrics().snapshot(), "Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables, e.g. TRELLIS_TOPIC=access_log
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("TRELLIS")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
