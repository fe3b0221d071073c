//! Soil hydration and climate readings.
//!
//! The soil probe reports a raw ADC count that is mapped onto a 0–100 %
//! hydration scale using the dry/wet calibration endpoints.  The climate
//! sensor reports temperature and relative humidity directly.

use anyhow::Result;
use std::fmt;

// ---------------------------------------------------------------------------
// Calibration + conversions
// ---------------------------------------------------------------------------

/// Raw probe counts at the two calibration endpoints.
///
/// Either endpoint may be the larger one: capacitive probes usually read
/// higher when dry, resistive ones higher when wet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    /// Raw value with the probe in dry air (maps to 0 %).
    pub dry: i32,
    /// Raw value with the probe in water (maps to 100 %).
    pub wet: i32,
}

/// Map a raw probe count onto 0–100 % hydration.
///
/// Linear between `dry` (0 %) and `wet` (100 %), truncating toward zero,
/// then clamped so readings outside the calibrated span stay in range.
pub fn hydration_percent(raw: i32, cal: Calibration) -> u8 {
    let span = i64::from(cal.wet) - i64::from(cal.dry);
    if span == 0 {
        return 0; // degenerate calibration, rejected by config validation
    }
    let pct = (i64::from(raw) - i64::from(cal.dry)) * 100 / span;
    pct.clamp(0, 100) as u8
}

pub fn celsius_to_fahrenheit(c: f32) -> f32 {
    c * 9.0 / 5.0 + 32.0
}

// ---------------------------------------------------------------------------
// Moisture label
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoistureLevel {
    VeryDry,
    Dry,
    SlightlyDry,
    Moist,
}

impl MoistureLevel {
    /// Step function over hydration: `<15`, `<30`, `<40`, else.
    pub fn from_hydration(pct: u8) -> Self {
        match pct {
            0..=14 => Self::VeryDry,
            15..=29 => Self::Dry,
            30..=39 => Self::SlightlyDry,
            _ => Self::Moist,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VeryDry => "VERY DRY",
            Self::Dry => "DRY",
            Self::SlightlyDry => "SLIGHTLY DRY",
            Self::Moist => "MOIST",
        }
    }
}

impl fmt::Display for MoistureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// One full sample of the plant's environment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub raw_soil: i32,
    pub hydration: u8,
    pub level: MoistureLevel,
    pub temp_c: f32,
    pub humidity: f32,
}

impl Reading {
    pub fn new(raw_soil: i32, cal: Calibration, climate: ClimateSample) -> Self {
        let hydration = hydration_percent(raw_soil, cal);
        Self {
            raw_soil,
            hydration,
            level: MoistureLevel::from_hydration(hydration),
            temp_c: climate.temp_c,
            humidity: climate.humidity,
        }
    }

    pub fn temp_f(&self) -> f32 {
        celsius_to_fahrenheit(self.temp_c)
    }
}

// ---------------------------------------------------------------------------
// Hardware seams
// ---------------------------------------------------------------------------

/// Temperature / relative humidity pair from the climate sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateSample {
    pub temp_c: f32,
    pub humidity: f32,
}

/// Source of raw soil-probe counts.
pub trait SoilProbe {
    fn read_raw(&mut self) -> Result<i32>;
}

/// Source of temperature / humidity samples.
pub trait ClimateSensor {
    fn sample(&mut self) -> Result<ClimateSample>;
}

/// Pairs the two sensors with the probe calibration.
pub struct SensorReader {
    soil: Box<dyn SoilProbe>,
    climate: Box<dyn ClimateSensor>,
    calibration: Calibration,
}

impl SensorReader {
    pub fn new(
        soil: Box<dyn SoilProbe>,
        climate: Box<dyn ClimateSensor>,
        calibration: Calibration,
    ) -> Self {
        Self {
            soil,
            climate,
            calibration,
        }
    }

    /// Sample both sensors and assemble a `Reading`.
    pub fn read(&mut self) -> Result<Reading> {
        let raw = self.soil.read_raw()?;
        let climate = self.climate.sample()?;
        Ok(Reading::new(raw, self.calibration, climate))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
