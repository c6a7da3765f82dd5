//! ADS1115 16-bit ADC driver over I2C for the soil-moisture and light sensors.
//!
//! Every logical read is configure-then-read: the device converts one
//! multiplexer input at a time, so channels are never interleaved.  The
//! driver is generic over [`I2cBus`] so the same framing runs against
//! `rppal` on a Raspberry Pi, the register-file simulator in dev builds, and
//! scripted buses in tests.

use std::time::Duration;

use crate::error::{BackendError, DeviceError};

/// Decoded two's-complement conversion result for one channel.
pub type RawSample = i16;

// ── ADS1115 register addresses ──────────────────────────────────────────────

/// Conversion result register (read-only, 16-bit signed).
pub(crate) const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
pub(crate) const REG_CONFIG: u8 = 0x01;

/// Default 7-bit slave address (ADDR pin tied to GND).
pub const DEFAULT_ADDRESS: u16 = 0x48;

// ── Config word fields ──────────────────────────────────────────────────────

/// Operational status: start a conversion.
const OS_START: u16 = 0x8000;
/// Single-ended multiplexer codes, indexed by channel (AIN0..AIN3 vs GND).
const MUX_SINGLE_ENDED: [u16; 4] = [0x4000, 0x5000, 0x6000, 0x7000];
const MUX_MASK: u16 = 0x7000;
/// ±4.096 V full-scale range.
const PGA_4_096V: u16 = 0x0100;
/// Continuous conversion mode.
const MODE_CONTINUOUS: u16 = 0x0080;
/// 128 samples per second.
const DR_128SPS: u16 = 0x0003;

const CONFIG_BASE: u16 = OS_START | PGA_4_096V | MODE_CONTINUOUS | DR_128SPS;

/// Maximum valid ADS1115 channel index (0–3 for single-ended).
pub const MAX_CHANNEL: u8 = 3;

/// Shortest settling delay the conversion register is trusted after.
pub const MIN_SETTLE: Duration = Duration::from_millis(100);

// ── Bus port ────────────────────────────────────────────────────────────────

/// Register-addressed block transfers on an I2C bus with the slave address
/// already selected.
pub trait I2cBus {
    type Error: std::error::Error + Send + Sync + 'static;

    fn block_write(&mut self, register: u8, data: &[u8]) -> Result<(), Self::Error>;
    fn block_read(&mut self, register: u8, buf: &mut [u8]) -> Result<(), Self::Error>;
}

#[cfg(feature = "adc")]
impl I2cBus for rppal::i2c::I2c {
    type Error = rppal::i2c::Error;

    fn block_write(&mut self, register: u8, data: &[u8]) -> Result<(), Self::Error> {
        rppal::i2c::I2c::block_write(self, register, data)
    }

    fn block_read(&mut self, register: u8, buf: &mut [u8]) -> Result<(), Self::Error> {
        rppal::i2c::I2c::block_read(self, register, buf)
    }
}

/// Open I2C bus `bus` and address the ADS1115 at `addr`.
#[cfg(feature = "adc")]
pub fn open_bus(bus: u8, addr: u16) -> Result<rppal::i2c::I2c, rppal::i2c::Error> {
    let mut i2c = rppal::i2c::I2c::with_bus(bus)?;
    i2c.set_slave_address(addr)?;
    tracing::info!(bus, addr = format_args!("0x{addr:02x}"), "i2c bus opened");
    Ok(i2c)
}

// ── Framing helpers ─────────────────────────────────────────────────────────

/// Build the config register value for a single-ended read on `channel`.
pub fn config_for_channel(channel: u8) -> Option<u16> {
    MUX_SINGLE_ENDED
        .get(usize::from(channel))
        .map(|mux| CONFIG_BASE | mux)
}

/// Channel selected by a config word, if its MUX field is single-ended.
pub(crate) fn channel_of_config(config: u16) -> Option<u8> {
    let mux = config & MUX_MASK;
    MUX_SINGLE_ENDED
        .iter()
        .position(|&m| m == mux)
        .and_then(|i| u8::try_from(i).ok())
}

/// Assemble a big-endian conversion result and reinterpret it as signed.
pub fn decode(bytes: [u8; 2]) -> RawSample {
    let value = i32::from(u16::from_be_bytes(bytes));
    let signed = if value > 0x7FFF { value - 0x1_0000 } else { value };
    // In range by construction: [-32768, 32767].
    signed as RawSample
}

fn bus_error<E>(register: u8) -> impl FnOnce(E) -> DeviceError
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |e| DeviceError::Bus {
        register,
        source: BackendError::from(e),
    }
}

// ── Driver ──────────────────────────────────────────────────────────────────

pub struct Ads1115<B> {
    bus: B,
    settle: Duration,
}

impl<B: I2cBus> Ads1115<B> {
    /// Wrap an addressed bus.  `settle` below [`MIN_SETTLE`] is raised to it.
    pub fn new(bus: B, settle: Duration) -> Self {
        Self {
            bus,
            settle: settle.max(MIN_SETTLE),
        }
    }

    /// Write the config word for `channel`, high byte first.
    pub fn configure(&mut self, channel: u8) -> Result<(), DeviceError> {
        let config = config_for_channel(channel).ok_or(DeviceError::InvalidChannel(channel))?;
        self.bus
            .block_write(REG_CONFIG, &config.to_be_bytes())
            .map_err(bus_error(REG_CONFIG))?;
        tracing::trace!(channel, config = format_args!("{config:#06x}"), "adc configured");
        Ok(())
    }

    /// Wait out the settling delay, then read the conversion register.
    pub async fn read(&mut self) -> Result<RawSample, DeviceError> {
        tokio::time::sleep(self.settle).await;

        let mut buf = [0u8; 2];
        self.bus
            .block_read(REG_CONVERSION, &mut buf)
            .map_err(bus_error(REG_CONVERSION))?;
        Ok(decode(buf))
    }

    /// Startup check: the device must accept a configuration write for
    /// `channel`.  Nothing is read back.
    pub fn probe(&mut self, channel: u8) -> Result<(), DeviceError> {
        self.configure(channel)?;
        tracing::info!(channel, "adc responded to probe");
        Ok(())
    }

    /// Configure `channel` and read one sample from it.
    pub async fn sample(&mut self, channel: u8) -> Result<RawSample, DeviceError> {
        self.configure(channel)?;
        let raw = self.read().await?;
        tracing::debug!(channel, raw, "adc sample");
        Ok(raw)
    }
}

// ── Scripted bus for tests ──────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod mock {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{channel_of_config, I2cBus, REG_CONFIG, REG_CONVERSION};

    #[derive(Debug, thiserror::Error)]
    #[error("simulated bus fault")]
    pub(crate) struct BusFault;

    #[derive(Default)]
    pub(crate) struct State {
        pub(crate) writes: Vec<(u8, Vec<u8>)>,
        pub(crate) reads: usize,
        pub(crate) codes: [i16; 4],
        pub(crate) selected: Option<u8>,
        pub(crate) fail_writes: bool,
        pub(crate) fail_reads: bool,
    }

    /// In-memory ADS1115 whose state stays inspectable after the bus is
    /// moved into a driver.
    #[derive(Clone, Default)]
    pub(crate) struct MockBus {
        pub(crate) state: Rc<RefCell<State>>,
    }

    impl MockBus {
        pub(crate) fn with_codes(codes: [i16; 4]) -> Self {
            let bus = Self::default();
            bus.state.borrow_mut().codes = codes;
            bus
        }

        pub(crate) fn set_code(&self, channel: usize, code: i16) {
            self.state.borrow_mut().codes[channel] = code;
        }

        pub(crate) fn fail_reads(&self, fail: bool) {
            self.state.borrow_mut().fail_reads = fail;
        }

        pub(crate) fn fail_writes(&self, fail: bool) {
            self.state.borrow_mut().fail_writes = fail;
        }
    }

    impl I2cBus for MockBus {
        type Error = BusFault;

        fn block_write(&mut self, register: u8, data: &[u8]) -> Result<(), BusFault> {
            let mut st = self.state.borrow_mut();
            if st.fail_writes {
                return Err(BusFault);
            }
            if register == REG_CONFIG && data.len() == 2 {
                st.selected = channel_of_config(u16::from_be_bytes([data[0], data[1]]));
            }
            st.writes.push((register, data.to_vec()));
            Ok(())
        }

        fn block_read(&mut self, register: u8, buf: &mut [u8]) -> Result<(), BusFault> {
            let mut st = self.state.borrow_mut();
            if st.fail_reads || register != REG_CONVERSION {
                return Err(BusFault);
            }
            st.reads += 1;
            let code = st.selected.map_or(0, |ch| st.codes[usize::from(ch)]);
            buf.copy_from_slice(&code.to_be_bytes());
            Ok(())
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::mock::MockBus;
    use super::*;

    // -- Config register construction -----------------------------------------

    #[test]
    fn config_register_channel_a0() {
        let cfg = config_for_channel(0).unwrap();
        assert_eq!(cfg, 0xC183, "A0 config: {cfg:#06x}");
    }

    #[test]
    fn config_register_channel_a1() {
        let cfg = config_for_channel(1).unwrap();
        assert_eq!(cfg, 0xD183, "A1 config: {cfg:#06x}");
    }

    #[test]
    fn config_register_channel_a2() {
        let cfg = config_for_channel(2).unwrap();
        assert_eq!(cfg, 0xE183, "A2 config: {cfg:#06x}");
    }

    #[test]
    fn config_register_channel_a3() {
        let cfg = config_for_channel(3).unwrap();
        assert_eq!(cfg, 0xF183, "A3 config: {cfg:#06x}");
    }

    #[test]
    fn config_register_rejects_channel_4() {
        assert_eq!(config_for_channel(4), None);
    }

    #[test]
    fn config_base_starts_conversion() {
        assert_eq!(CONFIG_BASE & 0x8000, 0x8000, "OS should be set");
    }

    #[test]
    fn channel_of_config_round_trips_mux() {
        for ch in 0..=MAX_CHANNEL {
            let cfg = config_for_channel(ch).unwrap();
            assert_eq!(channel_of_config(cfg), Some(ch));
        }
        assert_eq!(channel_of_config(CONFIG_BASE), None, "differential mux");
    }

    // -- Two's-complement decoding --------------------------------------------

    #[test]
    fn decode_positive() {
        assert_eq!(decode([0x00, 0x01]), 1);
        assert_eq!(decode([0x7F, 0xFF]), 32767);
    }

    #[test]
    fn decode_sign_bit_set() {
        assert_eq!(decode([0x80, 0x00]), -32768);
        assert_eq!(decode([0xFF, 0xFF]), -1);
        assert_eq!(decode([0xFF, 0xFE]), -2);
    }

    #[test]
    fn decode_matches_from_be_bytes() {
        for hi in [0x00u8, 0x12, 0x7F, 0x80, 0xA5, 0xFF] {
            for lo in [0x00u8, 0x01, 0x7F, 0x80, 0xFF] {
                assert_eq!(decode([hi, lo]), i16::from_be_bytes([hi, lo]));
            }
        }
    }

    // -- Driver framing -------------------------------------------------------

    #[test]
    fn configure_writes_high_byte_first() {
        let bus = MockBus::default();
        let mut adc = Ads1115::new(bus.clone(), MIN_SETTLE);
        adc.configure(1).unwrap();

        let st = bus.state.borrow();
        assert_eq!(st.writes, vec![(REG_CONFIG, vec![0xD1, 0x83])]);
    }

    #[test]
    fn configure_rejects_out_of_range_channel() {
        let bus = MockBus::default();
        let mut adc = Ads1115::new(bus.clone(), MIN_SETTLE);
        let err = adc.configure(4).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidChannel(4)));
        assert!(bus.state.borrow().writes.is_empty());
    }

    #[test]
    fn configure_bus_failure_names_config_register() {
        let bus = MockBus::default();
        bus.fail_writes(true);
        let mut adc = Ads1115::new(bus, MIN_SETTLE);
        let err = adc.configure(0).unwrap_err();
        assert!(matches!(err, DeviceError::Bus { register: REG_CONFIG, .. }));
    }

    #[test]
    fn probe_surfaces_a_dead_bus() {
        let bus = MockBus::default();
        let mut adc = Ads1115::new(bus.clone(), MIN_SETTLE);
        adc.probe(0).unwrap();
        assert_eq!(bus.state.borrow().selected, Some(0));

        bus.fail_writes(true);
        assert!(adc.probe(0).is_err());
    }

    #[test]
    fn settle_is_never_below_minimum() {
        let adc = Ads1115::new(MockBus::default(), Duration::from_millis(5));
        assert_eq!(adc.settle, MIN_SETTLE);
        let adc = Ads1115::new(MockBus::default(), Duration::from_millis(250));
        assert_eq!(adc.settle, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn read_waits_settle_delay() {
        let bus = MockBus::with_codes([1234, 0, 0, 0]);
        let mut adc = Ads1115::new(bus, Duration::from_millis(150));
        adc.configure(0).unwrap();

        let start = tokio::time::Instant::now();
        let raw = adc.read().await.unwrap();
        assert_eq!(raw, 1234);
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn sample_selects_the_requested_channel() {
        let bus = MockBus::with_codes([100, -200, 300, -400]);
        let mut adc = Ads1115::new(bus.clone(), MIN_SETTLE);

        assert_eq!(adc.sample(0).await.unwrap(), 100);
        assert_eq!(adc.sample(1).await.unwrap(), -200);
        assert_eq!(adc.sample(3).await.unwrap(), -400);

        let st = bus.state.borrow();
        assert_eq!(st.writes.len(), 3, "one config write per sample");
        assert_eq!(st.reads, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn read_failure_is_a_device_error() {
        let bus = MockBus::default();
        bus.fail_reads(true);
        let mut adc = Ads1115::new(bus, MIN_SETTLE);
        let err = adc.sample(0).await.unwrap_err();
        assert!(matches!(err, DeviceError::Bus { register: REG_CONVERSION, .. }));
        assert!(err.to_string().contains("simulated bus fault"));
    }
}
