//! Weather relay worker.
//!
//! Consumes readings from the `weather.raw` queue and forwards each one to
//! the ingestion API. Broker failures are fatal: the process exits non-zero
//! and relies on its supervisor for restarts.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use weather_relay::queue::shutdown_signal;
use weather_relay::{Config, Forwarder, QueueConsumer, Relay};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("relay_starting");

    let config = Config::from_env();
    let ingest_url = config
        .ingest_url()
        .with_context(|| format!("Invalid API_BASE_URL: {}", config.api_base_url))?;

    tracing::info!(
        rabbitmq_url_set = !config.rabbitmq_url.is_empty(),
        queue = %config.queue_name,
        ingest_url = %ingest_url,
        request_timeout_ms = config.request_timeout_ms,
        "config_loaded"
    );

    let forwarder = Forwarder::new(ingest_url, config.request_timeout())
        .context("Failed to create HTTP client")?;
    let relay = Relay::new(forwarder);

    let consumer = QueueConsumer::connect(&config).await?;
    let result = consumer.run(&relay, shutdown_signal()).await;

    if let Err(e) = &result {
        tracing::error!(error = ?e, "relay_failed");
    } else {
        tracing::info!("relay_shutdown_complete");
    }

    result
}
