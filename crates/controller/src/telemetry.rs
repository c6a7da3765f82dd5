//! Per-cycle telemetry record and the connect → publish → disconnect framing
//! around a [`Broker`].

use serde::Serialize;

use crate::decision::Decision;
use crate::error::PublishError;
use crate::weather::{WeatherOutcome, WeatherSnapshot};

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct TelemetryRecord {
    pub ts: i64,
    pub moisture_percentage: f64,
    pub light_voltage: f64,
    pub valve_state: String,
    pub weather: TelemetryWeather,
}

/// The weather object, or a plain-text marker when there is none.
#[derive(Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum TelemetryWeather {
    Report(WeatherReport),
    Notice(&'static str),
}

#[derive(Debug, Serialize, PartialEq)]
pub struct WeatherReport {
    pub city: String,
    pub temperature_celsius: f64,
    pub temperature_fahrenheit: f64,
    pub description: String,
    pub temperature_status: &'static str,
}

pub const CITY_NOT_FOUND: &str = "City not found.";
pub const WEATHER_UNAVAILABLE: &str = "Weather unavailable.";

impl From<&WeatherSnapshot> for WeatherReport {
    fn from(s: &WeatherSnapshot) -> Self {
        Self {
            city: s.city.clone(),
            temperature_celsius: s.temperature_celsius,
            temperature_fahrenheit: s.temperature_fahrenheit,
            description: s.description.clone(),
            temperature_status: if s.freezing { "Freezing" } else { "Normal" },
        }
    }
}

impl From<&WeatherOutcome> for TelemetryWeather {
    fn from(outcome: &WeatherOutcome) -> Self {
        match outcome {
            WeatherOutcome::Available(s) => Self::Report(s.into()),
            WeatherOutcome::NotFound => Self::Notice(CITY_NOT_FOUND),
            WeatherOutcome::Unavailable(_) => Self::Notice(WEATHER_UNAVAILABLE),
        }
    }
}

impl TelemetryRecord {
    pub fn new(
        moisture_percentage: f64,
        light_voltage: f64,
        decision: &Decision,
        weather: &WeatherOutcome,
    ) -> Self {
        Self {
            ts: now_unix(),
            moisture_percentage,
            light_voltage,
            valve_state: decision.to_string(),
            weather: weather.into(),
        }
    }
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

// ---------------------------------------------------------------------------
// Broker port
// ---------------------------------------------------------------------------

/// A message broker session with at-least-once publish.
///
/// Implementations own reconnect backoff and offline queueing: `publish` on
/// a disconnected broker should keep the message for a later session.
pub trait Broker {
    async fn connect(&mut self) -> Result<(), PublishError>;
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
    async fn disconnect(&mut self) -> Result<(), PublishError>;
}

pub struct TelemetryPublisher<P> {
    broker: P,
    topic: String,
}

impl<P: Broker> TelemetryPublisher<P> {
    pub fn new(broker: P, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Serialise `record` and push it through one broker session.
    ///
    /// `publish` is still called when `connect` fails so the broker can
    /// queue the message.  The first error wins.
    pub async fn publish(&mut self, record: &TelemetryRecord) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(record)?;

        let connected = self.broker.connect().await;
        let published = self.broker.publish(&self.topic, payload).await;
        let disconnected = if connected.is_ok() {
            self.broker.disconnect().await
        } else {
            Ok(())
        };

        connected.and(published).and(disconnected)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
