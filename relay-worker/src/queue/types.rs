//! Queue message types.
//!
//! `weather.raw` carries one JSON object per reading, published by the
//! collector and consumed here.

use serde::de::{Error as _, Unexpected};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default queue name for raw weather readings.
pub const WEATHER_QUEUE: &str = "weather.raw";

/// A single weather reading as published on the queue and posted to the API.
///
/// All five fields are required. Unknown fields (the collector also sends
/// humidity, pressure and description) are ignored and not forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    /// ISO-8601 timestamp, passed through unvalidated
    pub timestamp: String,
    /// Temperature in degrees
    pub temperature: f64,
    /// Wind speed
    pub windspeed: f64,
    /// Wind direction in degrees
    pub winddirection: f64,
    /// City name
    pub city: String,
}

impl WeatherReading {
    /// Parse a reading from a raw delivery payload.
    ///
    /// Only a JSON object is accepted. The derived `Deserialize` would also
    /// take a positional array, which the collector never sends.
    pub fn from_payload(payload: &[u8]) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_slice(payload)?;

        if value.is_object() {
            return serde_json::from_value(value);
        }

        let unexpected = match &value {
            Value::Object(_) => Unexpected::Map,
            Value::Null => Unexpected::Unit,
            Value::Bool(b) => Unexpected::Bool(*b),
            Value::Number(_) => Unexpected::Other("number"),
            Value::String(s) => Unexpected::Str(s.as_str()),
            Value::Array(_) => Unexpected::Seq,
        };

        Err(serde_json::Error::invalid_type(unexpected, &"a JSON object"))
    }

    /// Canonical JSON body sent to the ingestion API.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
