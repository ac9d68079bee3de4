//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - The reading type carried on the queue
//! - Exactly-once delivery settlement
//! - The consumer that drains the queue
//!
//! ## Flow
//!
//! ```text
//! collector → weather.raw queue → QueueConsumer → DeliveryHandler → ack / nack
//! ```

pub mod consumer;
pub mod delivery;
pub mod types;

pub use consumer::{drain, shutdown_signal, DeliveryHandler, QueueConsumer};
pub use delivery::{Acknowledger, Disposition, PendingDelivery};
pub use types::{WeatherReading, WEATHER_QUEUE};
