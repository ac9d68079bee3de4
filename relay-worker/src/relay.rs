//! Reading relay - the per-delivery pipeline.
//!
//! ```text
//! payload ──parse──┬─ error ──────────────► reject, no requeue
//!                  └─ ok ──POST──┬─ 1xx/2xx ► ack
//!                                └─ other ─► reject, requeue
//! ```
//!
//! A payload that fails to parse will fail the same way on every redelivery,
//! so it is dropped. Forward failures are retried through the broker with no
//! delay and no cap.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info};

use crate::forward::Forwarder;
use crate::queue::{
    Acknowledger, DeliveryHandler, Disposition, PendingDelivery, WeatherReading,
};

/// Maximum number of payload bytes included in parse-failure logs.
const PAYLOAD_PREVIEW: usize = 500;

/// Turns deliveries into forwarded readings.
pub struct Relay {
    forwarder: Forwarder,
}

impl Relay {
    pub fn new(forwarder: Forwarder) -> Self {
        Self { forwarder }
    }

    /// Decide the disposition for one payload, forwarding it if it parses.
    pub async fn decide(&self, payload: &[u8]) -> Disposition {
        let reading = match WeatherReading::from_payload(payload) {
            Ok(reading) => reading,
            Err(e) => {
                error!(
                    error = %e,
                    body_preview = %String::from_utf8_lossy(
                        &payload[..payload.len().min(PAYLOAD_PREVIEW)]
                    ),
                    "reading_parse_failed"
                );
                return Disposition::discard();
            }
        };

        match self.forwarder.forward(&reading).await {
            Ok(status) => {
                info!(
                    city = %reading.city,
                    timestamp = %reading.timestamp,
                    status_code = status,
                    "reading_forwarded"
                );
                Disposition::Ack
            }
            Err(e) => {
                error!(
                    city = %reading.city,
                    timestamp = %reading.timestamp,
                    error = %e,
                    "reading_forward_failed"
                );
                Disposition::requeue()
            }
        }
    }
}

#[async_trait]
impl DeliveryHandler for Relay {
    async fn handle<A: Acknowledger + 'static>(&self, delivery: PendingDelivery<A>) -> Result<()> {
        let delivery_tag = delivery.delivery_tag();
        let disposition = self.decide(delivery.payload()).await;

        delivery.settle(disposition).await?;

        info!(
            delivery_tag = delivery_tag,
            disposition = disposition.as_str(),
            "rabbitmq_delivery_settled"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::queue::delivery::testing::RecordingAcker;

    const VALID: &str = r#"{"timestamp":"2024-01-01T00:00:00Z","temperature":21.5,"windspeed":3.2,"winddirection":180,"city":"Lisbon"}"#;

    fn relay(server: &MockServer) -> Relay {
        let endpoint = Url::parse(&format!("{}/weather/logs", server.uri())).unwrap();
        Relay::new(Forwarder::new(endpoint, Duration::from_secs(10)).unwrap())
    }

    async fn mount(server: &MockServer, status: u16, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/weather/logs"))
            .respond_with(ResponseTemplate::new(status))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_decide_ack_on_created() {
        let server = MockServer::start().await;
        mount(&server, 201, 1).await;

        assert_eq!(relay(&server).decide(VALID.as_bytes()).await, Disposition::Ack);
    }

    #[tokio::test]
    async fn test_decide_discard_on_malformed_without_post() {
        let server = MockServer::start().await;
        mount(&server, 201, 0).await;
        let relay = relay(&server);

        for payload in ["not-json", "42", r#"{"temperature":21.5}"#] {
            assert_eq!(
                relay.decide(payload.as_bytes()).await,
                Disposition::Reject { requeue: false }
            );
        }
    }

    #[tokio::test]
    async fn test_decide_requeue_on_server_error() {
        let server = MockServer::start().await;
        mount(&server, 500, 1).await;

        assert_eq!(
            relay(&server).decide(VALID.as_bytes()).await,
            Disposition::Reject { requeue: true }
        );
    }

    #[tokio::test]
    async fn test_decide_is_stable_across_redelivery() {
        let server = MockServer::start().await;
        mount(&server, 503, 2).await;
        let relay = relay(&server);

        let first = relay.decide(VALID.as_bytes()).await;
        let second = relay.decide(VALID.as_bytes()).await;
        assert_eq!(first, second);
        assert_eq!(first, Disposition::requeue());

        assert_eq!(relay.decide(b"not-json").await, relay.decide(b"not-json").await);
    }

    #[tokio::test]
    async fn test_handle_settles_exactly_once() {
        let server = MockServer::start().await;
        mount(&server, 200, 1).await;
        let acker = RecordingAcker::default();

        relay(&server)
            .handle(PendingDelivery::new(7, false, VALID.as_bytes().to_vec(), acker.clone()))
            .await
            .unwrap();

        assert_eq!(acker.dispositions(), vec![Disposition::Ack]);
    }

    #[tokio::test]
    async fn test_handle_propagates_settle_failure() {
        let server = MockServer::start().await;
        mount(&server, 200, 1).await;

        let result = relay(&server)
            .handle(PendingDelivery::new(
                7,
                false,
                VALID.as_bytes().to_vec(),
                RecordingAcker::failing(),
            ))
            .await;

        assert!(result.is_err());
    }
}
