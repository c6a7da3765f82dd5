//! Simulated ADS1115 register file for development builds without I2C.
//!
//! Models the two sensors the controller reads:
//! - Soil moisture: random walk with mean reversion, slow drying drift and
//!   per-read electronic noise.  Higher code = wetter soil.
//! - Ambient light: diurnal sine wave plus noise, never below zero.
//!
//! The simulator honours the register protocol: a config write selects the
//! channel through its MUX field, a conversion read returns the next sample
//! for that channel big-endian.

use std::fmt;

use crate::adc::{channel_of_config, I2cBus, REG_CONFIG, REG_CONVERSION};

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("register {0:#04x} does not support this transfer")]
    BadRegister(u8),
    #[error("expected a 2-byte transfer, got {0}")]
    BadLength(usize),
    #[error("conversion read before any channel was configured")]
    NotConfigured,
}

// ---------------------------------------------------------------------------
// Signal models
// ---------------------------------------------------------------------------

/// Soil moisture in ADC codes.
struct SoilModel {
    base: f64,
    center: f64,
    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,
}

impl SoilModel {
    fn new() -> Self {
        // Starts around 40 % so a fresh sim run opens the valve.
        let center = -6500.0;
        Self {
            base: center + gaussian(0.0, 1500.0),
            center,
            drift_per_sample: -25.0,
            walk_sigma: 300.0,
            mean_reversion: 0.02,
            noise_sigma: 80.0,
        }
    }

    fn next(&mut self) -> f64 {
        let pull = self.mean_reversion * (self.center - self.base);
        let walk = gaussian(0.0, self.walk_sigma);
        self.base = (self.base + self.drift_per_sample + pull + walk).clamp(-30000.0, 30000.0);
        self.base + gaussian(0.0, self.noise_sigma)
    }
}

/// Light-dependent resistor divider, in ADC codes.
struct LightModel {
    peak: f64,
    period_s: f64,
    noise_sigma: f64,
}

impl LightModel {
    fn next(&self) -> f64 {
        let now_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let phase = 2.0 * std::f64::consts::PI * now_s / self.period_s;
        (self.peak * phase.sin() + gaussian(0.0, self.noise_sigma)).max(0.0)
    }
}

// ---------------------------------------------------------------------------
// Simulated device
// ---------------------------------------------------------------------------

pub struct SimBus {
    moisture_channel: u8,
    light_channel: u8,
    selected: Option<u8>,
    soil: SoilModel,
    light: LightModel,
}

impl SimBus {
    /// Wire the soil model to `moisture_channel` and the light model to
    /// `light_channel`; the other inputs read as floating near zero.
    pub fn new(moisture_channel: u8, light_channel: u8) -> Self {
        tracing::info!(
            moisture_channel,
            light_channel,
            "[sim-adc] simulated ads1115 initialised (no hardware)"
        );
        Self {
            moisture_channel,
            light_channel,
            selected: None,
            soil: SoilModel::new(),
            light: LightModel {
                peak: 24000.0,
                period_s: 600.0,
                noise_sigma: 150.0,
            },
        }
    }

    fn next_code(&mut self, channel: u8) -> i16 {
        let value = if channel == self.moisture_channel {
            self.soil.next()
        } else if channel == self.light_channel {
            self.light.next()
        } else {
            gaussian(0.0, 20.0)
        };
        value.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
    }
}

impl fmt::Debug for SimBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimBus")
            .field("moisture_channel", &self.moisture_channel)
            .field("light_channel", &self.light_channel)
            .field("selected", &self.selected)
            .finish_non_exhaustive()
    }
}

impl I2cBus for SimBus {
    type Error = SimError;

    fn block_write(&mut self, register: u8, data: &[u8]) -> Result<(), SimError> {
        if register != REG_CONFIG {
            return Err(SimError::BadRegister(register));
        }
        let word: [u8; 2] = data.try_into().map_err(|_| SimError::BadLength(data.len()))?;
        self.selected = channel_of_config(u16::from_be_bytes(word));
        Ok(())
    }

    fn block_read(&mut self, register: u8, buf: &mut [u8]) -> Result<(), SimError> {
        if register != REG_CONVERSION {
            return Err(SimError::BadRegister(register));
        }
        if buf.len() != 2 {
            return Err(SimError::BadLength(buf.len()));
        }
        let channel = self.selected.ok_or(SimError::NotConfigured)?;
        let code = self.next_code(channel);
        buf.copy_from_slice(&code.to_be_bytes());
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
