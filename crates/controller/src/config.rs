//! TOML config file loading, environment overrides and validation.
//!
//! Every section has defaults matching the reference deployment (ADS1115 at
//! 0x48 on bus 1, valve relay on BCM 27, 10 s cycle), so a missing file at
//! the default path is not an error.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::adc::{DEFAULT_ADDRESS, MAX_CHANNEL, MIN_SETTLE};
use crate::weather::DEFAULT_BASE_URL;

pub const DEFAULT_PATH: &str = "config.toml";

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub control: ControlConfig,
    pub weather: WeatherConfig,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub i2c_bus: u8,
    pub adc_address: u16,
    pub moisture_channel: u8,
    pub light_channel: u8,
    pub settle_ms: u64,
    pub valve_gpio_pin: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            adc_address: DEFAULT_ADDRESS,
            moisture_channel: 0,
            light_channel: 1,
            settle_ms: 100,
            valve_gpio_pin: 27,
        }
    }
}

impl DeviceConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub cycle_interval_sec: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            cycle_interval_sec: 10,
        }
    }
}

impl ControlConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_sec)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub base_url: String,
    pub api_key: String,
    pub city: String,
    pub timeout_sec: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            city: "New York City".to_string(),
            timeout_sec: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub keep_alive_sec: u64,
    pub connect_timeout_sec: u64,
    pub operation_timeout_sec: u64,
    pub backoff_base_sec: u64,
    pub backoff_max_sec: u64,
    pub drain_interval_ms: u64,
    /// Upper bound on time spent draining the offline queue per session.
    pub drain_budget_ms: u64,
    pub tls: Option<TlsConfig>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "Green_Sense_Project".to_string(),
            topic: "MyTopics/SensorData".to_string(),
            keep_alive_sec: 30,
            connect_timeout_sec: 10,
            operation_timeout_sec: 5,
            backoff_base_sec: 1,
            backoff_max_sec: 32,
            drain_interval_ms: 500,
            drain_budget_ms: 3000,
            tls: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TlsConfig {
    pub ca_path: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

/// Highest 7-bit I2C address.
const I2C_ADDRESS_MAX: u16 = 0x7F;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all sections. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_device(&mut errors);
        self.validate_control(&mut errors);
        self.validate_weather(&mut errors);
        self.validate_mqtt(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_device(&self, errors: &mut Vec<String>) {
        let d = &self.device;

        // ── ADC ─────────────────────────────────────────────
        if d.adc_address > I2C_ADDRESS_MAX {
            errors.push(format!(
                "device: adc_address {:#04x} is not a 7-bit I2C address",
                d.adc_address
            ));
        }
        for (name, ch) in [
            ("moisture_channel", d.moisture_channel),
            ("light_channel", d.light_channel),
        ] {
            if ch > MAX_CHANNEL {
                errors.push(format!(
                    "device: {name} {ch} out of range [0, {MAX_CHANNEL}]"
                ));
            }
        }
        if d.moisture_channel == d.light_channel {
            errors.push(format!(
                "device: moisture_channel and light_channel are both {}",
                d.moisture_channel
            ));
        }
        if d.settle() < MIN_SETTLE {
            errors.push(format!(
                "device: settle_ms {} is below the {} ms minimum",
                d.settle_ms,
                MIN_SETTLE.as_millis()
            ));
        }

        // ── GPIO pin whitelist ──────────────────────────────
        if !VALID_GPIO_PINS.contains(&d.valve_gpio_pin) {
            errors.push(format!(
                "device: valve_gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                d.valve_gpio_pin
            ));
        }
    }

    fn validate_control(&self, errors: &mut Vec<String>) {
        if self.control.cycle_interval_sec == 0 {
            errors.push("control: cycle_interval_sec must be positive".to_string());
        }
    }

    fn validate_weather(&self, errors: &mut Vec<String>) {
        let w = &self.weather;
        if w.base_url.trim().is_empty() {
            errors.push("weather: base_url is empty".to_string());
        }
        if w.city.trim().is_empty() {
            errors.push("weather: city is empty".to_string());
        }
        if w.timeout_sec == 0 {
            errors.push("weather: timeout_sec must be positive".to_string());
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;

        // ── Identity ────────────────────────────────────────
        if m.host.trim().is_empty() {
            errors.push("mqtt: host is empty".to_string());
        }
        if m.port == 0 {
            errors.push("mqtt: port must be non-zero".to_string());
        }
        if m.client_id.trim().is_empty() {
            errors.push("mqtt: client_id is empty".to_string());
        }
        if m.topic.trim().is_empty() {
            errors.push("mqtt: topic is empty".to_string());
        } else if m.topic.contains(['+', '#']) {
            errors.push(format!(
                "mqtt: topic '{}' contains a wildcard, which is not allowed when publishing",
                m.topic
            ));
        }

        // ── Timing values (all must be positive) ────────────
        for (name, value) in [
            ("keep_alive_sec", m.keep_alive_sec),
            ("connect_timeout_sec", m.connect_timeout_sec),
            ("operation_timeout_sec", m.operation_timeout_sec),
            ("backoff_base_sec", m.backoff_base_sec),
            ("backoff_max_sec", m.backoff_max_sec),
        ] {
            if value == 0 {
                errors.push(format!("mqtt: {name} must be positive"));
            }
        }
        if m.drain_budget_ms == 0 {
            errors.push("mqtt: drain_budget_ms must be positive".to_string());
        } else if self.control.cycle_interval_sec > 0
            && m.drain_budget_ms >= self.control.cycle_interval_sec.saturating_mul(1000)
        {
            errors.push(format!(
                "mqtt: drain_budget_ms ({}) must be shorter than the {} s cycle",
                m.drain_budget_ms, self.control.cycle_interval_sec
            ));
        }
        if m.backoff_base_sec > m.backoff_max_sec {
            errors.push(format!(
                "mqtt: backoff_base_sec ({}) exceeds backoff_max_sec ({})",
                m.backoff_base_sec, m.backoff_max_sec
            ));
        }

        // ── TLS ─────────────────────────────────────────────
        if let Some(tls) = &m.tls {
            if tls.ca_path.trim().is_empty() {
                errors.push("mqtt.tls: ca_path is empty".to_string());
            }
            if tls.cert_path.is_some() != tls.key_path.is_some() {
                errors.push("mqtt.tls: cert_path and key_path must be set together".to_string());
            }
        }
    }

    /// Apply `WEATHER_API_KEY`, `WEATHER_CITY`, `MQTT_HOST` and `MQTT_PORT`
    /// from `lookup` on top of the file values.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("WEATHER_API_KEY") {
            self.weather.api_key = key;
        }
        if let Some(city) = lookup("WEATHER_CITY") {
            self.weather.city = city;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            match port.trim().parse() {
                Ok(p) => self.mqtt.port = p,
                Err(_) => warn!(value = %port, "ignoring invalid MQTT_PORT"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file (no validation).
pub fn parse(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    Ok(config)
}

/// Resolve the config for this process: the file named by `CONFIG_PATH`
/// (which must exist), else `config.toml` if present, else defaults; then
/// environment overrides; then validation.
pub fn load_from_env() -> Result<Config> {
    let explicit = std::env::var("CONFIG_PATH").ok();
    let path = explicit.as_deref().unwrap_or(DEFAULT_PATH);

    let mut config = if explicit.is_some() || Path::new(path).exists() {
        parse(path)?
    } else {
        info!(path, "no config file, using built-in defaults");
        Config::default()
    };

    config.apply_overrides(|key| std::env::var(key).ok());
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;

    if config.weather.api_key.is_empty() {
        warn!("weather api_key is empty; weather will be reported unavailable");
    }
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
