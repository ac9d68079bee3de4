//! Delivery settlement.
//!
//! Every message pulled off the queue is wrapped in a [`PendingDelivery`],
//! which owns the broker acknowledgment handle. Settling consumes the token,
//! so a delivery can be acked or rejected once and only once.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicNackOptions},
};
use tracing::warn;

/// Terminal outcome for a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the message from the queue.
    Ack,
    /// Reject the message, optionally making it available for redelivery.
    Reject { requeue: bool },
}

impl Disposition {
    /// Reject permanently. Used for payloads that can never succeed.
    pub fn discard() -> Self {
        Disposition::Reject { requeue: false }
    }

    /// Reject and hand the message back to the broker for redelivery.
    pub fn requeue() -> Self {
        Disposition::Reject { requeue: true }
    }

    /// Short label for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Reject { requeue: true } => "requeue",
            Disposition::Reject { requeue: false } => "discard",
        }
    }
}

/// Broker-side acknowledgment handle.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;

    async fn nack(&self, requeue: bool) -> Result<()>;
}

#[async_trait]
impl Acknowledger for Acker {
    async fn ack(&self) -> Result<()> {
        Acker::ack(self, BasicAckOptions::default())
            .await
            .context("Failed to ack delivery")
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        Acker::nack(
            self,
            BasicNackOptions {
                requeue,
                ..Default::default()
            },
        )
        .await
        .context("Failed to nack delivery")
    }
}

/// A delivery awaiting its single terminal disposition.
pub struct PendingDelivery<A: Acknowledger> {
    delivery_tag: u64,
    redelivered: bool,
    payload: Vec<u8>,
    acker: Option<A>,
}

impl<A: Acknowledger> PendingDelivery<A> {
    pub fn new(delivery_tag: u64, redelivered: bool, payload: Vec<u8>, acker: A) -> Self {
        Self {
            delivery_tag,
            redelivered,
            payload,
            acker: Some(acker),
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Whether the broker has delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Apply the disposition, consuming the delivery.
    pub async fn settle(mut self, disposition: Disposition) -> Result<()> {
        let acker = self
            .acker
            .take()
            .context("Delivery has no acknowledgment handle")?;

        match disposition {
            Disposition::Ack => acker.ack().await,
            Disposition::Reject { requeue } => acker.nack(requeue).await,
        }
        .with_context(|| format!("Failed to settle delivery {}", self.delivery_tag))
    }
}

impl<A: Acknowledger> Drop for PendingDelivery<A> {
    fn drop(&mut self) {
        if self.acker.is_some() {
            warn!(
                delivery_tag = self.delivery_tag,
                "rabbitmq_delivery_dropped_unsettled"
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording acknowledger shared by the unit tests.

    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    pub struct RecordingAcker {
        pub settled: Arc<Mutex<Vec<Disposition>>>,
        pub fail: bool,
    }

    impl RecordingAcker {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn dispositions(&self) -> Vec<Disposition> {
            self.settled.lock().unwrap().clone()
        }

        fn record(&self, disposition: Disposition) -> Result<()> {
            if self.fail {
                anyhow::bail!("channel closed");
            }
            self.settled.lock().unwrap().push(disposition);
            Ok(())
        }
    }

    #[async_trait]
    impl Acknowledger for RecordingAcker {
        async fn ack(&self) -> Result<()> {
            self.record(Disposition::Ack)
        }

        async fn nack(&self, requeue: bool) -> Result<()> {
            self.record(Disposition::Reject { requeue })
        }
    }
}
