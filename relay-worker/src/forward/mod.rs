//! Forwarding readings to the ingestion API.
//!
//! One `POST {API_BASE_URL}/weather/logs` per reading, bounded by the
//! configured timeout. Any status in `[100, 300)` counts as delivered.

use std::time::Duration;

use reqwest::{header::CONTENT_TYPE, redirect, Client, Url};
use thiserror::Error;
use tracing::{error, info};

use crate::queue::WeatherReading;

/// Maximum number of response body bytes kept for error logs.
const ERROR_BODY_PREVIEW: usize = 500;

/// Reasons a forward attempt failed. All of them warrant a requeue.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to serialize reading: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("ingestion API did not respond within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("request to ingestion API failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("ingestion API returned status {status}")]
    Status { status: u16, body: String },
}

/// Whether a status code counts as a successful delivery.
pub fn is_success_status(status: u16) -> bool {
    (100..300).contains(&status)
}

/// HTTP client bound to the ingestion endpoint.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl Forwarder {
    /// Build a forwarder posting to `endpoint`.
    ///
    /// Redirects are not followed, so a 3xx is classified as a failure
    /// rather than silently re-posted elsewhere.
    pub fn new(endpoint: Url, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// POST a reading and return the response status on success.
    pub async fn forward(&self, reading: &WeatherReading) -> Result<u16, ForwardError> {
        let body = reading.to_json()?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!(
                        url = %self.endpoint,
                        timeout_seconds = self.timeout.as_secs_f64(),
                        error = %e,
                        "forward_timeout"
                    );
                    ForwardError::Timeout {
                        timeout: self.timeout,
                    }
                } else {
                    error!(url = %self.endpoint, error = %e, "forward_request_error");
                    ForwardError::Transport(e)
                }
            })?;

        let status = response.status().as_u16();
        if is_success_status(status) {
            info!(url = %self.endpoint, status_code = status, "forward_complete");
            return Ok(status);
        }

        // The body is only for diagnostics; a read failure leaves it empty.
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > ERROR_BODY_PREVIEW {
            let mut cut = ERROR_BODY_PREVIEW;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        error!(
            url = %self.endpoint,
            status_code = status,
            body_preview = %body,
            "forward_rejected"
        );

        Err(ForwardError::Status { status, body })
    }
}
