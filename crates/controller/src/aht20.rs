//! AHT20 temperature / humidity sensor over I2C.
//!
//! Protocol: after power-up, check the calibration bit in the status byte
//! and send the init command if it is clear.  Each measurement is triggered
//! with `0xAC 0x33 0x00`, takes ~80 ms, and returns a 7-byte frame:
//!
//! ```text
//! [0] status   bit 7 = busy, bit 3 = calibrated
//! [1..=3]      humidity, 20 bits (high nibble of [3] is the LSB nibble)
//! [3..=5]      temperature, 20 bits (low nibble of [3] is the MSB nibble)
//! [6]          CRC-8, poly 0x31, init 0xFF, over bytes 0..=5
//! ```

use anyhow::{ensure, Result};
use rppal::i2c::I2c;
use std::{thread, time::Duration};

use crate::sensor::{ClimateSample, ClimateSensor};

const CMD_STATUS: u8 = 0x71;
const CMD_INIT: [u8; 3] = [0xBE, 0x08, 0x00];
const CMD_TRIGGER: [u8; 3] = [0xAC, 0x33, 0x00];

const STATUS_BUSY: u8 = 0x80;
const STATUS_CALIBRATED: u8 = 0x08;

/// 2^20, full scale of both 20-bit fields.
const FULL_SCALE: f32 = 1_048_576.0;

const POWER_ON_DELAY: Duration = Duration::from_millis(40);
const INIT_DELAY: Duration = Duration::from_millis(10);
const MEASURE_WAIT: Duration = Duration::from_millis(80);
const BUSY_RETRIES: usize = 3;

pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Decode a measurement frame into °C and %RH.
pub fn decode_frame(frame: &[u8; 7]) -> Result<ClimateSample> {
    ensure!(frame[0] & STATUS_BUSY == 0, "aht20 measurement not ready");

    let crc = crc8(&frame[..6]);
    ensure!(
        crc == frame[6],
        "aht20 crc mismatch: computed 0x{crc:02x}, frame 0x{:02x}",
        frame[6]
    );

    let raw_h = (u32::from(frame[1]) << 12) | (u32::from(frame[2]) << 4) | (u32::from(frame[3]) >> 4);
    let raw_t =
        ((u32::from(frame[3]) & 0x0F) << 16) | (u32::from(frame[4]) << 8) | u32::from(frame[5]);

    Ok(ClimateSample {
        temp_c: raw_t as f32 / FULL_SCALE * 200.0 - 50.0,
        humidity: raw_h as f32 / FULL_SCALE * 100.0,
    })
}

// ── Driver ──────────────────────────────────────────────────────────────────

pub struct Aht20 {
    i2c: I2c,
}

impl Aht20 {
    /// Open I2C bus 1, probe the sensor at `addr` and calibrate it if needed.
    /// Fails if nothing acknowledges at that address.
    pub fn new(addr: u16) -> Result<Self> {
        let mut i2c = I2c::new()?;
        i2c.set_slave_address(addr)?;
        thread::sleep(POWER_ON_DELAY);

        let mut status = [0u8; 1];
        i2c.write_read(&[CMD_STATUS], &mut status)?;
        if status[0] & STATUS_CALIBRATED == 0 {
            i2c.write(&CMD_INIT)?;
            thread::sleep(INIT_DELAY);
        }

        tracing::info!(
            addr = format_args!("0x{addr:02x}"),
            status = format_args!("0x{:02x}", status[0]),
            "aht20 initialised"
        );

        Ok(Self { i2c })
    }
}

impl ClimateSensor for Aht20 {
    fn sample(&mut self) -> Result<ClimateSample> {
        self.i2c.write(&CMD_TRIGGER)?;
        thread::sleep(MEASURE_WAIT);

        let mut frame = [0u8; 7];
        for _ in 0..BUSY_RETRIES {
            self.i2c.read(&mut frame)?;
            if frame[0] & STATUS_BUSY == 0 {
                break;
            }
            thread::sleep(INIT_DELAY);
        }
        decode_frame(&frame)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
