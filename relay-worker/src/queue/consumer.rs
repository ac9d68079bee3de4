//! RabbitMQ consumer module using lapin.
//!
//! Connects to the broker, declares the readings queue and drains deliveries
//! one at a time through a [`DeliveryHandler`]. There is no reconnect loop:
//! a connection or channel failure ends [`QueueConsumer::run`] with an error
//! and the process is expected to be restarted by its supervisor.

use std::future::Future;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use lapin::{
    options::{BasicConsumeOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties, Consumer,
};
use tokio::signal;
use tracing::{error, info, warn};

use super::delivery::{Acknowledger, PendingDelivery};
use crate::config::Config;

/// Something that brings each delivery to its terminal disposition.
///
/// An `Err` means the disposition could not be applied (the channel is gone)
/// and stops the consumer.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle<A: Acknowledger + 'static>(&self, delivery: PendingDelivery<A>) -> Result<()>;
}

/// A live subscription to the readings queue.
pub struct QueueConsumer {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    queue: String,
}

impl QueueConsumer {
    /// Connect, declare the queue and start a manual-ack subscription.
    pub async fn connect(config: &Config) -> Result<Self> {
        info!(url_length = config.rabbitmq_url.len(), "rabbitmq_connecting");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        info!("rabbitmq_connected");

        let channel = connection
            .create_channel()
            .await
            .context("Failed to create channel")?;

        info!("rabbitmq_channel_created");

        // Durable, not exclusive, not auto-deleted. Matches the collector's
        // declaration so redeclaring is a no-op.
        channel
            .queue_declare(
                &config.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("Failed to declare queue")?;

        info!(queue = %config.queue_name, "rabbitmq_queue_declared");

        // Default options: manual ack, not exclusive. No QoS, broker default prefetch.
        let consumer = channel
            .basic_consume(
                &config.queue_name,
                &config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .context("Failed to start consumer")?;

        info!(
            queue = %config.queue_name,
            consumer_tag = %config.consumer_tag,
            "rabbitmq_consumer_started"
        );

        Ok(Self {
            connection,
            channel,
            consumer,
            queue: config.queue_name.clone(),
        })
    }

    /// Drain deliveries until `shutdown` resolves or the subscription fails.
    pub async fn run<H, F>(self, handler: &H, shutdown: F) -> Result<()>
    where
        H: DeliveryHandler,
        F: Future<Output = ()>,
    {
        let Self {
            connection,
            channel,
            consumer,
            queue,
        } = self;

        let deliveries = consumer.map(|delivery| {
            delivery.map(|d| PendingDelivery::new(d.delivery_tag, d.redelivered, d.data, d.acker))
        });

        drain(deliveries, handler, shutdown)
            .await
            .with_context(|| format!("Consumer for queue {queue} stopped"))?;

        if let Err(e) = channel.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_channel_close_error");
        }
        if let Err(e) = connection.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_connection_close_error");
        }

        info!(queue = %queue, "rabbitmq_consumer_closed");
        Ok(())
    }
}

/// Process a delivery stream sequentially.
///
/// Each delivery is handled to completion before the next one is pulled.
/// `shutdown` is only observed between deliveries. Returns `Ok` on shutdown;
/// a stream error, the end of the stream, or a handler error is fatal.
pub async fn drain<S, A, E, H, F>(deliveries: S, handler: &H, shutdown: F) -> Result<()>
where
    S: Stream<Item = Result<PendingDelivery<A>, E>>,
    A: Acknowledger + 'static,
    E: std::error::Error + Send + Sync + 'static,
    H: DeliveryHandler,
    F: Future<Output = ()>,
{
    tokio::pin!(deliveries);
    tokio::pin!(shutdown);

    info!("relay_ready");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("relay_stopping");
                return Ok(());
            }
            next = deliveries.next() => {
                match next {
                    Some(Ok(delivery)) => {
                        info!(
                            delivery_tag = delivery.delivery_tag(),
                            redelivered = delivery.redelivered(),
                            body_length = delivery.payload().len(),
                            "rabbitmq_reading_received"
                        );

                        handler.handle(delivery).await?;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "rabbitmq_delivery_error");
                        return Err(e).context("Delivery stream failed");
                    }
                    None => {
                        error!("rabbitmq_consumer_cancelled");
                        bail!("Delivery stream ended");
                    }
                }
            }
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "ctrl_c_handler_install_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "sigterm_handler_install_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
