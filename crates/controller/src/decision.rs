//! Valve decision policy: rain overrides dry soil, otherwise open below the
//! moisture threshold.

use std::fmt;

use crate::weather::WeatherSnapshot;

/// Soil is watered strictly below this percentage.
pub const MOISTURE_THRESHOLD: f64 = 70.0;

/// Matched case-insensitively anywhere in the weather description.
const RAIN_MARKER: &str = "rain";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveCommand {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rationale {
    RainDetected,
    MoistureLow,
    MoistureSufficient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub command: ValveCommand,
    pub rationale: Rationale,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.command, self.rationale) {
            (ValveCommand::Closed, Rationale::RainDetected) => write!(f, "closed (rain detected)"),
            (ValveCommand::Open, Rationale::MoistureLow) => write!(f, "opened (moisture < 70%)"),
            (ValveCommand::Closed, Rationale::MoistureSufficient) => {
                write!(f, "closed (moisture >= 70%)")
            }
            (command, rationale) => write!(f, "{command:?} ({rationale:?})"),
        }
    }
}

/// Decide the valve state for this cycle.
///
/// `weather` is `None` when the service was unavailable or did not know the
/// city; that is "no rain signal", not an error.  A percentage outside
/// 0–100 is compared as-is.
pub fn decide(moisture_percentage: f64, weather: Option<&WeatherSnapshot>) -> Decision {
    let raining = weather.is_some_and(|w| w.description.to_lowercase().contains(RAIN_MARKER));

    let (command, rationale) = if raining {
        (ValveCommand::Closed, Rationale::RainDetected)
    } else if moisture_percentage < MOISTURE_THRESHOLD {
        (ValveCommand::Open, Rationale::MoistureLow)
    } else {
        (ValveCommand::Closed, Rationale::MoistureSufficient)
    };

    Decision { command, rationale }
}

// ===========================================================================
// Tests
// ===========================================================================
