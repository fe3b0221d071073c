//! Wiring between config and concrete peripherals.  The `hw` feature opens
//! the real rppal-backed devices; `sim` substitutes the garden simulator.

use anyhow::Result;

use crate::config::Config;
use crate::pump::RelayPin;
use crate::sensor::{ClimateSensor, SoilProbe};

#[cfg(not(any(feature = "hw", feature = "sim")))]
compile_error!("enable either the `hw` or the `sim` feature");

/// Relay pin and soil probe.  In simulation they share a watering flag, so
/// they are built together.
#[cfg(feature = "hw")]
pub fn open_pump_and_probe(cfg: &Config) -> Result<(Box<dyn RelayPin>, Box<dyn SoilProbe>)> {
    use crate::adc::Ads1115Probe;
    use crate::pump::GpioRelay;

    let hw = &cfg.hardware;
    let relay = GpioRelay::new(hw.relay_gpio)?;
    let probe = Ads1115Probe::new(hw.adc_addr, hw.adc_channel)?;
    Ok((Box::new(relay), Box::new(probe)))
}

#[cfg(all(feature = "sim", not(feature = "hw")))]
pub fn open_pump_and_probe(cfg: &Config) -> Result<(Box<dyn RelayPin>, Box<dyn SoilProbe>)> {
    use crate::sim::{garden, Scenario};

    let scenario = Scenario::from_str_lossy(&std::env::var("SIM_SCENARIO").unwrap_or_default());
    tracing::info!(%scenario, "running against simulated garden");

    let (soil, relay) = garden(scenario, cfg.calibration.calibration());
    Ok((Box::new(relay), Box::new(soil)))
}

#[cfg(feature = "hw")]
pub fn open_climate(cfg: &Config) -> Result<Box<dyn ClimateSensor>> {
    let sensor = crate::aht20::Aht20::new(cfg.hardware.climate_addr)?;
    Ok(Box::new(sensor))
}

#[cfg(all(feature = "sim", not(feature = "hw")))]
pub fn open_climate(_cfg: &Config) -> Result<Box<dyn ClimateSensor>> {
    Ok(Box::new(crate::sim::SimClimate::new()))
}
