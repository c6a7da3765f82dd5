//! Error types for the hardware, weather and broker edges.
//!
//! Each concern gets its own enum so the control loop can apply a different
//! policy per kind: device errors abort a cycle, weather errors degrade to
//! "no rain signal", publish errors are logged and left to the broker's
//! offline queue.

use std::time::Duration;

/// Boxed source error from a hardware backend (rppal, simulator, mocks).
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("i2c transaction on register {register:#04x} failed: {source}")]
    Bus {
        register: u8,
        #[source]
        source: BackendError,
    },

    #[error("adc channel {0} out of range (0-3)")]
    InvalidChannel(u8),
}

#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("weather request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed weather response: missing {0}")]
    Malformed(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("telemetry serialisation failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("mqtt connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("mqtt operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("broker reconnect backing off, next attempt in {0:?}")]
    BackingOff(Duration),

    #[error("broker offline, {0} message(s) queued")]
    Offline(usize),
}
