//! Weather relay - moves weather readings from RabbitMQ to the ingestion API.
//!
//! ## Architecture
//!
//! ```text
//! Collector → weather.raw → QueueConsumer → Relay → POST /weather/logs
//! ```
//!
//! Each delivery is parsed, forwarded and then acked (API accepted it),
//! rejected without requeue (payload is not a valid reading) or rejected with
//! requeue (API unreachable, timed out or refused it).

pub mod config;
pub mod forward;
pub mod queue;
pub mod relay;

// Re-export commonly used types
pub use config::Config;
pub use forward::{ForwardError, Forwarder};
pub use queue::{
    Disposition, PendingDelivery, QueueConsumer, WeatherReading, WEATHER_QUEUE,
};
pub use relay::Relay;
