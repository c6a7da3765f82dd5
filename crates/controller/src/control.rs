//! The acquisition → decision → actuation → telemetry loop.
//!
//! ## Loop state machine
//!
//! ```text
//! Running ──[cycle]──▶ sleep(interval) ──▶ Running
//!    │                     │
//!    └──[shutdown seen]────┴──────────────▶ Terminating
//! ```
//!
//! The shutdown flag is checked before every cycle and raced against the
//! inter-cycle sleep; it is never observed in the middle of a cycle.  The
//! loop does not release the valve itself: the caller owns the
//! [`Actuator`] and runs its shutdown on every exit path.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::adc::{Ads1115, I2cBus};
use crate::convert::{to_percentage, to_voltage};
use crate::decision::{decide, Decision};
use crate::error::{DeviceError, PublishError};
use crate::telemetry::{Broker, TelemetryPublisher, TelemetryRecord};
use crate::valve::{Actuator, OutputLine};
use crate::weather::{WeatherOutcome, WeatherSource};

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub moisture_channel: u8,
    pub light_channel: u8,
    pub city: String,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Terminating,
}

/// What one completed cycle saw and did.
#[derive(Debug)]
pub struct CycleReport {
    pub moisture_percentage: f64,
    pub light_voltage: f64,
    pub weather: WeatherOutcome,
    pub decision: Decision,
    pub publish: Result<(), PublishError>,
}

pub struct Controller<'a, B, L: OutputLine, W, P> {
    adc: Ads1115<B>,
    actuator: &'a mut Actuator<L>,
    weather: W,
    telemetry: TelemetryPublisher<P>,
    settings: LoopSettings,
}

impl<'a, B, L, W, P> Controller<'a, B, L, W, P>
where
    B: I2cBus,
    L: OutputLine,
    W: WeatherSource,
    P: Broker,
{
    pub fn new(
        adc: Ads1115<B>,
        actuator: &'a mut Actuator<L>,
        weather: W,
        telemetry: TelemetryPublisher<P>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            adc,
            actuator,
            weather,
            telemetry,
            settings,
        }
    }

    /// Run one cycle.
    ///
    /// A device error aborts before anything is actuated or published, so
    /// the valve keeps its previous state.  Weather and broker failures never
    /// fail the cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, DeviceError> {
        // ── Acquire ─────────────────────────────────────────────────
        let moisture_raw = self.adc.sample(self.settings.moisture_channel).await?;
        let moisture_percentage = to_percentage(moisture_raw);
        println!("Moisture Percentage: {moisture_percentage:.2}");

        let light_raw = self.adc.sample(self.settings.light_channel).await?;
        let light_voltage = to_voltage(light_raw);
        println!("Light Voltage: {light_voltage:.3} V");

        // ── Decide + actuate ────────────────────────────────────────
        let weather = self.weather.fetch(&self.settings.city).await;
        let decision = decide(moisture_percentage, weather.snapshot());
        if self.actuator.set(decision.command) {
            debug!(state = ?self.actuator.state(), "valve switched");
        }

        println!("Valve is {decision}");
        println!("{}", weather_summary(&weather));

        // ── Telemetry ───────────────────────────────────────────────
        let record = TelemetryRecord::new(moisture_percentage, light_voltage, &decision, &weather);
        let publish = self.telemetry.publish(&record).await;
        match &publish {
            Ok(()) => debug!(topic = self.telemetry.topic(), "telemetry published"),
            Err(e) => warn!(topic = self.telemetry.topic(), "telemetry not delivered: {e}"),
        }

        Ok(CycleReport {
            moisture_percentage,
            light_voltage,
            weather,
            decision,
            publish,
        })
    }

    /// Cycle every `interval` until `shutdown` turns true.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut state = LoopState::Running;
        let mut cycle: u64 = 0;

        info!(interval = ?self.settings.interval, "control loop started");

        while state == LoopState::Running {
            if *shutdown.borrow_and_update() {
                break;
            }

            cycle += 1;
            match self.run_cycle().await {
                Ok(report) => info!(
                    cycle,
                    moisture_percentage = report.moisture_percentage,
                    light_voltage = report.light_voltage,
                    valve = %report.decision,
                    weather = ?report.weather,
                    delivered = report.publish.is_ok(),
                    "cycle complete"
                ),
                Err(e) => error!(cycle, "cycle aborted: {e}"),
            }

            state = self.wait_next(&mut shutdown).await;
        }

        info!(cycles = cycle, "control loop terminating");
    }

    /// Sleep until the next cycle is due, or until shutdown is requested.
    async fn wait_next(&self, shutdown: &mut watch::Receiver<bool>) -> LoopState {
        let tick = sleep(self.settings.interval);
        tokio::pin!(tick);

        loop {
            tokio::select! {
                () = &mut tick => return state_of(shutdown),
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // No one can signal any more; just finish the wait.
                        (&mut tick).await;
                        return state_of(shutdown);
                    }
                    if *shutdown.borrow_and_update() {
                        return LoopState::Terminating;
                    }
                }
            }
        }
    }
}

fn state_of(shutdown: &watch::Receiver<bool>) -> LoopState {
    if *shutdown.borrow() {
        LoopState::Terminating
    } else {
        LoopState::Running
    }
}

/// Human-readable weather lines for the console, one per line.
fn weather_summary(weather: &WeatherOutcome) -> String {
    match weather {
        WeatherOutcome::Available(w) => {
            let mut lines = vec![
                format!("Weather in {}:", w.city),
                format!(
                    "Temperature: {:.1}°C / {:.1}°F",
                    w.temperature_celsius, w.temperature_fahrenheit
                ),
                format!("Description: {}", w.description),
            ];
            if w.freezing {
                lines.push("WARNING: Freezing temperature detected!".to_string());
            }
            lines.join("\n")
        }
        WeatherOutcome::NotFound => "City not found.".to_string(),
        WeatherOutcome::Unavailable(reason) => format!("Weather unavailable: {reason}"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
