//! Simulated soil probe, climate sensor and pump relay for local development.
//!
//! The soil model tracks "dryness" as a 0..1 fraction of the calibrated span
//! and renders it to raw counts in whichever direction the calibration runs:
//! - random walk with mean reversion
//! - gradual drying drift (evaporation)
//! - per-reading ADC noise and occasional spikes
//! - closed-loop watering: pump on-time recorded by the relay soaks in on
//!   the next read
//!
//! The climate model is a slow sinusoid around a room-temperature baseline.

use anyhow::Result;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use tokio::time::Instant;

use crate::pump::{relay_level, Level, RelayPin};
use crate::sensor::{Calibration, ClimateSample, ClimateSensor, SoilProbe};

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Irwin-Hall: sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts around the watering threshold and dries steadily, so the pump
    /// fires within the first few check windows.
    Drying,
    /// Hovers mid-range with low noise.
    Stable,
    /// High noise and frequent spikes.
    Flaky,
    /// Starts near the wet end and barely dries; the pump should stay off.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }

    /// (start dryness, drift per sample, walk sigma, noise sigma, spike prob)
    fn params(self) -> (f64, f64, f64, f64, f32) {
        match self {
            Self::Drying => (0.55, 0.004, 0.004, 0.006, 0.03),
            Self::Stable => (0.40, 0.0005, 0.002, 0.003, 0.005),
            Self::Flaky => (0.50, 0.002, 0.008, 0.015, 0.10),
            Self::Wet => (0.10, 0.0002, 0.002, 0.004, 0.02),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Soil
// ---------------------------------------------------------------------------

/// Dryness recovered per second of pump on-time.
const WET_PER_SEC: f64 = 0.15;
const MEAN_REVERSION: f64 = 0.01;
const SPIKE_SIGMA: f64 = 0.15;

pub struct SimSoil {
    cal: Calibration,
    /// 0.0 = saturated, 1.0 = bone dry.
    dryness: f64,
    drift: f64,
    walk_sigma: f64,
    noise_sigma: f64,
    spike_prob: f32,
    centre: f64,
    /// Pump on-time not yet soaked into the model.
    pumped: Rc<Cell<Duration>>,
}

impl SimSoil {
    fn new(scenario: Scenario, cal: Calibration, pumped: Rc<Cell<Duration>>) -> Self {
        let (start, drift, walk_sigma, noise_sigma, spike_prob) = scenario.params();
        Self {
            cal,
            dryness: start,
            drift,
            walk_sigma,
            noise_sigma,
            spike_prob,
            centre: start,
            pumped,
        }
    }

    fn to_raw(&self, dryness: f64) -> i32 {
        let wet = f64::from(self.cal.wet);
        let dry = f64::from(self.cal.dry);
        (wet + dryness * (dry - wet)).round() as i32
    }
}

impl SoilProbe for SimSoil {
    fn read_raw(&mut self) -> Result<i32> {
        let pull = MEAN_REVERSION * (self.centre - self.dryness);
        let walk = gaussian(0.0, self.walk_sigma);
        let soaked = WET_PER_SEC * self.pumped.replace(Duration::ZERO).as_secs_f64();
        self.dryness = (self.dryness + self.drift + pull + walk - soaked).clamp(-0.05, 1.05);

        let noise = gaussian(0.0, self.noise_sigma);
        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, SPIKE_SIGMA)
        } else {
            0.0
        };

        Ok(self.to_raw(self.dryness + noise + spike).max(0))
    }
}

// ---------------------------------------------------------------------------
// Climate
// ---------------------------------------------------------------------------

/// Length of one simulated day/night cycle.
const CLIMATE_PERIOD_S: f64 = 600.0;

pub struct SimClimate {
    started: Instant,
    base_temp_c: f64,
    base_humidity: f64,
}

impl SimClimate {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            base_temp_c: 22.0,
            base_humidity: 55.0,
        }
    }
}

impl ClimateSensor for SimClimate {
    fn sample(&mut self) -> Result<ClimateSample> {
        let t = self.started.elapsed().as_secs_f64();
        let phase = (2.0 * std::f64::consts::PI * t / CLIMATE_PERIOD_S).sin();

        // Warmer afternoons are drier.
        let temp_c = self.base_temp_c + 3.0 * phase + gaussian(0.0, 0.1);
        let humidity = (self.base_humidity - 8.0 * phase + gaussian(0.0, 0.5)).clamp(0.0, 100.0);

        Ok(ClimateSample {
            temp_c: temp_c as f32,
            humidity: humidity as f32,
        })
    }
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

/// Relay that credits pump on-time to the soil model when it switches off.
/// The control loop never reads while the pump runs, so the water lands on
/// the next read.
pub struct SimRelay {
    pumped: Rc<Cell<Duration>>,
    on_since: Option<Instant>,
}

impl RelayPin for SimRelay {
    fn write(&mut self, level: Level) -> Result<()> {
        if level == relay_level(true) {
            self.on_since.get_or_insert_with(Instant::now);
        } else if let Some(since) = self.on_since.take() {
            let ran = since.elapsed();
            self.pumped.set(self.pumped.get() + ran);
            tracing::debug!(ran_ms = ran.as_millis() as u64, "[sim] pump off");
        }
        tracing::debug!(?level, "[sim] relay");
        Ok(())
    }
}

/// Build a soil probe and relay sharing one on-time accumulator.
pub fn garden(scenario: Scenario, cal: Calibration) -> (SimSoil, SimRelay) {
    let pumped = Rc::new(Cell::new(Duration::ZERO));
    let soil = SimSoil::new(scenario, cal, Rc::clone(&pumped));
    (
        soil,
        SimRelay {
            pumped,
            on_since: None,
        },
    )
}

// ===========================================================================
// Tests
// ===========================================================================
