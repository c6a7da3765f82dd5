mod adc;
mod config;
mod control;
mod convert;
mod decision;
mod error;
mod mqtt;
#[cfg(not(feature = "adc"))]
mod sim;
mod telemetry;
mod valve;
mod weather;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adc::{Ads1115, I2cBus};
use config::Config;
use control::{Controller, LoopSettings};
use mqtt::MqttBroker;
use telemetry::TelemetryPublisher;
use valve::{Actuator, OutputLine};
use weather::OpenWeather;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "irrigation_controller=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let cfg = config::load_from_env()?;

    // ── Valve line ──────────────────────────────────────────────────
    #[cfg(feature = "gpio")]
    let line = valve::open_line(cfg.device.valve_gpio_pin)
        .with_context(|| format!("failed to claim valve gpio {}", cfg.device.valve_gpio_pin))?;
    #[cfg(not(feature = "gpio"))]
    let line = valve::LoggingLine::new(cfg.device.valve_gpio_pin);

    let actuator = Actuator::new(line);

    // ── ADC bus ─────────────────────────────────────────────────────
    #[cfg(feature = "adc")]
    let bus = adc::open_bus(cfg.device.i2c_bus, cfg.device.adc_address).with_context(|| {
        format!(
            "failed to open i2c bus {} at {:#04x}",
            cfg.device.i2c_bus, cfg.device.adc_address
        )
    })?;
    #[cfg(not(feature = "adc"))]
    let bus = {
        info!(
            i2c_bus = cfg.device.i2c_bus,
            "adc feature disabled, simulating the i2c bus"
        );
        sim::SimBus::new(cfg.device.moisture_channel, cfg.device.light_channel)
    };

    // ── Shutdown signal ─────────────────────────────────────────────
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = tx.send(true);
    });

    let outcome = run(&cfg, bus, actuator, rx).await;
    if let Err(e) = &outcome {
        tracing::error!("controller stopped: {e:#}");
    }
    outcome
}

/// Serve until shutdown or a fatal error, then release the valve.  The
/// release happens on every way out, errors included.
async fn run<B: I2cBus, L: OutputLine>(
    cfg: &Config,
    bus: B,
    mut actuator: Actuator<L>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let outcome = serve(cfg, bus, &mut actuator, shutdown).await;
    actuator.shutdown();
    println!("GPIO cleanup completed");
    outcome
}

async fn serve<B: I2cBus, L: OutputLine>(
    cfg: &Config,
    bus: B,
    actuator: &mut Actuator<L>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    // ── ADC probe ───────────────────────────────────────────────────
    let mut adc = Ads1115::new(bus, cfg.device.settle());
    adc.probe(cfg.device.moisture_channel)
        .context("adc did not respond at startup")?;

    // ── Weather + telemetry ─────────────────────────────────────────
    let weather = OpenWeather::new(
        &cfg.weather.base_url,
        &cfg.weather.api_key,
        std::time::Duration::from_secs(cfg.weather.timeout_sec),
    )
    .context("failed to build weather client")?;

    let broker = MqttBroker::from_config(&cfg.mqtt)?;
    let telemetry = TelemetryPublisher::new(broker, cfg.mqtt.topic.clone());

    // ── Control loop ────────────────────────────────────────────────
    let settings = LoopSettings {
        moisture_channel: cfg.device.moisture_channel,
        light_channel: cfg.device.light_channel,
        city: cfg.weather.city.clone(),
        interval: cfg.control.interval(),
    };
    info!(city = %settings.city, topic = %cfg.mqtt.topic, "controller started");

    Controller::new(adc, actuator, weather, telemetry, settings)
        .run(shutdown)
        .await;

    println!("Program terminated by user.");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("ctrl-c handler unavailable: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("interrupt received"),
        () = terminate => info!("terminate received"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::mock::MockBus;
    use crate::decision::ValveCommand;
    use crate::valve::mock::RecordingLine;

    #[tokio::test]
    async fn dead_adc_at_startup_still_releases_valve() {
        let bus = MockBus::default();
        bus.fail_writes(true);
        let line = RecordingLine::default();
        let (_tx, rx) = watch::channel(false);

        let err = run(&Config::default(), bus, Actuator::new(line.clone()), rx)
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("adc did not respond at startup"), "{err:#}");
        // Construction drives LOW, cleanup drives LOW once more, drop adds nothing.
        assert_eq!(line.history(), vec![false, false]);
    }

    #[tokio::test]
    async fn release_after_open_valve_on_fatal_error() {
        let bus = MockBus::default();
        bus.fail_writes(true);
        let line = RecordingLine::default();
        let mut actuator = Actuator::new(line.clone());
        actuator.set(ValveCommand::Open);
        let (_tx, rx) = watch::channel(false);

        assert!(run(&Config::default(), bus, actuator, rx).await.is_err());
        assert_eq!(line.history(), vec![false, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_requested_before_start_exits_cleanly() {
        let bus = MockBus::default();
        let line = RecordingLine::default();
        let (_tx, rx) = watch::channel(true);

        run(&Config::default(), bus.clone(), Actuator::new(line.clone()), rx)
            .await
            .unwrap();

        // Only the probe touched the bus; no cycle ran.
        assert_eq!(bus.state.borrow().writes.len(), 1);
        assert_eq!(bus.state.borrow().reads, 0);
        assert_eq!(line.history(), vec![false, false]);
    }
}
