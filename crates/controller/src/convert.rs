//! Raw ADC code → engineering unit conversions.

use crate::adc::RawSample;

const CODE_MIN: f64 = i16::MIN as f64;
const CODE_MAX: f64 = i16::MAX as f64;

/// Full-scale reference at PGA ±4.096 V.
const FULL_SCALE_VOLTS: f64 = 4.096;

/// Linear rescale of the full signed 16-bit range onto 0–100 %.
///
/// Not clamped: a code outside the sensor's calibrated span still maps onto
/// the full range and is passed through as-is.
pub fn to_percentage(raw: RawSample) -> f64 {
    (f64::from(raw) - CODE_MIN) * 100.0 / (CODE_MAX - CODE_MIN)
}

pub fn to_voltage(raw: RawSample) -> f64 {
    f64::from(raw) * FULL_SCALE_VOLTS / 32768.0
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    // -- to_percentage --------------------------------------------------------

    #[test]
    fn percentage_endpoints() {
        assert!(to_percentage(i16::MIN).abs() < EPS);
        assert!((to_percentage(i16::MAX) - 100.0).abs() < EPS);
    }

    #[test]
    fn percentage_zero_code_is_just_above_half() {
        // 32768 / 65535
        let p = to_percentage(0);
        assert!((p - 50.000_762_951_094_87).abs() < 1e-6, "got {p}");
    }

    #[test]
    fn percentage_is_monotonic_over_full_range() {
        let mut prev = to_percentage(i16::MIN);
        for raw in (i16::MIN..=i16::MAX).skip(1) {
            let p = to_percentage(raw);
            assert!(p >= prev, "not monotonic at {raw}: {p} < {prev}");
            prev = p;
        }
    }

    #[test]
    fn percentage_stays_within_bounds_for_every_code() {
        // The signed range maps exactly onto 0..=100; out-of-calibration
        // sensors show up as extreme but in-bounds values, never clamped.
        for raw in [i16::MIN, -1, 0, 1, 12_000, 26_000, i16::MAX] {
            let p = to_percentage(raw);
            assert!((0.0..=100.0).contains(&p), "{raw} → {p}");
        }
    }

    // -- to_voltage -----------------------------------------------------------

    #[test]
    fn voltage_full_scale() {
        let v = to_voltage(i16::MAX);
        assert!((v - 4.096 * 32767.0 / 32768.0).abs() < EPS, "got {v}");
    }

    #[test]
    fn voltage_negative_full_scale() {
        assert!((to_voltage(i16::MIN) + 4.096).abs() < EPS);
    }

    #[test]
    fn voltage_zero() {
        assert_eq!(to_voltage(0), 0.0);
    }

    #[test]
    fn voltage_one_lsb_is_125_microvolts() {
        assert!((to_voltage(1) - 0.000_125).abs() < EPS);
    }

    // -- celsius_to_fahrenheit ------------------------------------------------

    #[test]
    fn fahrenheit_fixed_points() {
        assert_eq!(celsius_to_fahrenheit(0.0), 32.0);
        assert_eq!(celsius_to_fahrenheit(100.0), 212.0);
        assert_eq!(celsius_to_fahrenheit(-40.0), -40.0);
    }
}
