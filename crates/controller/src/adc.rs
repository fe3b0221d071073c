//! ADS1115 16-bit ADC over I2C, used as the soil probe's analog input.
//!
//! Reads one single-ended channel at PGA ±4.096 V, 128 SPS, single-shot mode.
//! Typical capacitive-probe endpoints at this gain: raw_dry ≈ 26000,
//! raw_wet ≈ 12000.

use anyhow::Result;
use rppal::i2c::I2c;
use std::thread;
use std::time::Duration;

use crate::config::MAX_ADC_CHANNEL;
use crate::sensor::SoilProbe;

// ── ADS1115 register addresses ──────────────────────────────────────────────

/// Conversion result register (read-only, 16-bit signed).
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
const REG_CONFIG: u8 = 0x01;

// ── Config register bit fields ──────────────────────────────────────────────
//
// Layout (MSB first):
//   [15]    OS       write 1 to start a single-shot conversion
//   [14:12] MUX      input multiplexer (channel selection)
//   [11:9]  PGA      programmable gain amplifier
//   [8]     MODE     0 = continuous, 1 = single-shot
//   [7:5]   DR       data rate
//   [4:0]   COMP_*   comparator, 11 in [1:0] disables it

/// OS=1, PGA=001 (±4.096 V), MODE=1, DR=100 (128 SPS), COMP_QUE=11.
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

const MUX_SHIFT: u8 = 12;
/// AINx vs GND for x = 0..=3.
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

/// ~7.8 ms conversion at 128 SPS.
const CONVERSION_WAIT: Duration = Duration::from_millis(9);

/// Conversion-ready flag when the config register is read back.
const OS_READY_BIT: u16 = 1 << 15;

/// Config register value for a single-ended read on `channel`.
fn config_for_channel(channel: usize) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[channel] << MUX_SHIFT)
}

/// Single-ended results are non-negative; anything else is bus noise.
fn clamp_single_ended(raw: i16) -> i32 {
    i32::from(raw).clamp(0, i32::from(i16::MAX))
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// Soil probe wired to one ADS1115 input.
pub struct Ads1115Probe {
    i2c: I2c,
    channel: usize,
}

impl Ads1115Probe {
    /// Open I2C bus 1 and address the ADS1115 at `addr`.
    pub fn new(addr: u16, channel: usize) -> Result<Self> {
        anyhow::ensure!(
            channel <= MAX_ADC_CHANNEL,
            "ADS1115 channel {channel} out of range (0–{MAX_ADC_CHANNEL})"
        );

        let mut i2c = I2c::new()?;
        i2c.set_slave_address(addr)?;

        tracing::info!(
            addr = format_args!("0x{addr:02x}"),
            channel,
            "ads1115 initialised"
        );

        Ok(Self { i2c, channel })
    }

    fn read_channel(&mut self) -> Result<i16> {
        let config = config_for_channel(self.channel);
        self.i2c.block_write(REG_CONFIG, &config.to_be_bytes())?;

        thread::sleep(CONVERSION_WAIT);

        // One wait is normally enough at 128 SPS.
        for _ in 0..3 {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }
}

impl SoilProbe for Ads1115Probe {
    fn read_raw(&mut self) -> Result<i32> {
        let raw = self.read_channel()?;
        Ok(clamp_single_ended(raw))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
