//! Valve control via a single GPIO line. The `gpio` feature gates the real
//! rppal driver; without it, a mock line logs level changes.
//!
//! HIGH = valve open, LOW = valve closed.  The [`Actuator`] starts closed,
//! only touches the line when the commanded state changes, and is forced
//! closed exactly once on shutdown.

use tracing::{info, warn};

use crate::decision::ValveCommand;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Line port
// ---------------------------------------------------------------------------

pub trait OutputLine {
    fn set_high(&mut self);
    fn set_low(&mut self);
}

// ---------------------------------------------------------------------------
// Real GPIO line (requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
impl OutputLine for OutputPin {
    fn set_high(&mut self) {
        OutputPin::set_high(self);
    }

    fn set_low(&mut self) {
        OutputPin::set_low(self);
    }
}

/// Claim BCM pin `pin` as an output, driven LOW before it is returned.
#[cfg(feature = "gpio")]
pub fn open_line(pin: u8) -> Result<OutputPin, rppal::gpio::Error> {
    let mut line = Gpio::new()?.get(pin)?.into_output();
    line.set_low();
    // Restore the pin mode when the process lets go of it.
    line.set_reset_on_drop(true);
    info!(pin, "valve gpio line claimed");
    Ok(line)
}

// ---------------------------------------------------------------------------
// Mock line (no hardware, logs level changes)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct LoggingLine {
    pin: u8,
}

#[cfg(not(feature = "gpio"))]
impl LoggingLine {
    pub fn new(pin: u8) -> Self {
        info!(pin, "[mock-gpio] valve line registered (not wired)");
        Self { pin }
    }
}

#[cfg(not(feature = "gpio"))]
impl OutputLine for LoggingLine {
    fn set_high(&mut self) {
        info!(pin = self.pin, "[mock-gpio] line HIGH");
    }

    fn set_low(&mut self) {
        info!(pin = self.pin, "[mock-gpio] line LOW");
    }
}

// ---------------------------------------------------------------------------
// Actuator
// ---------------------------------------------------------------------------

pub struct Actuator<L: OutputLine> {
    line: L,
    state: ValveCommand,
    released: bool,
}

impl<L: OutputLine> Actuator<L> {
    /// Take ownership of `line` and drive it to the closed level.
    pub fn new(mut line: L) -> Self {
        line.set_low();
        Self {
            line,
            state: ValveCommand::Closed,
            released: false,
        }
    }

    pub fn state(&self) -> ValveCommand {
        self.state
    }

    /// Drive the line to `command`.  Returns whether the level changed.
    pub fn set(&mut self, command: ValveCommand) -> bool {
        if self.released {
            warn!(?command, "valve already released, ignoring command");
            return false;
        }
        if command == self.state {
            return false;
        }
        match command {
            ValveCommand::Open => self.line.set_high(),
            ValveCommand::Closed => self.line.set_low(),
        }
        self.state = command;
        info!(?command, "valve set");
        true
    }

    /// Force the valve closed and stop accepting commands.  Only the first
    /// call touches the line.
    pub fn shutdown(&mut self) {
        if self.released {
            return;
        }
        self.line.set_low();
        self.state = ValveCommand::Closed;
        self.released = true;
        info!("valve released in closed state");
    }
}

impl<L: OutputLine> Drop for Actuator<L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Recording line for tests
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================
