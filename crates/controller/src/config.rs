//! TOML config file loading, env overrides and validation.
//!
//! Every field has a default, so an absent file yields a working standalone
//! controller with telemetry disabled.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::sensor::Calibration;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub calibration: CalibrationConfig,
    pub watering: WateringConfig,
    pub display: DisplayConfig,
    pub hardware: HardwareConfig,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Raw probe value when completely dry.
    pub dry: i32,
    /// Raw probe value when submerged in water.
    pub wet: i32,
}

/// 12-bit defaults.  An ADS1115 probe needs its own endpoints, typically
/// around dry 26000 / wet 12000.
impl Default for CalibrationConfig {
    fn default() -> Self {
        Self { dry: 4095, wet: 0 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WateringConfig {
    /// Water when hydration is strictly below this percentage.
    pub dry_threshold: u8,
    pub check_interval_ms: u64,
    pub pump_duration_ms: u64,
}

impl Default for WateringConfig {
    fn default() -> Self {
        Self {
            dry_threshold: 40,
            check_interval_ms: 15_000,
            pump_duration_ms: 1_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Delay between loop iterations.
    pub interval_ms: u64,
    /// Settle time after setup, before the first iteration.
    pub startup_delay_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            startup_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// BCM pin driving the pump relay input.
    pub relay_gpio: u8,
    /// ADS1115 I2C address.
    pub adc_addr: u16,
    /// ADS1115 single-ended input carrying the soil probe (0–3).
    pub adc_channel: usize,
    /// AHT20 I2C address.
    pub climate_addr: u16,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            relay_gpio: 25,
            adc_addr: 0x48,
            adc_channel: 0,
            climate_addr: 0x38,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub topic: String,
    /// MQTT client id; also the thing name on the broker.
    pub device_id: String,
    pub publish_interval_ms: u64,
    /// Pause between connection attempts.
    pub retry_delay_ms: u64,
    pub ca_path: String,
    pub cert_path: String,
    pub key_path: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8883,
            topic: "plant/telemetry".to_string(),
            device_id: "plant-controller".to_string(),
            publish_interval_ms: 30_000,
            retry_delay_ms: 5_000,
            ca_path: "certs/root-ca.pem".to_string(),
            cert_path: "certs/device.pem.crt".to_string(),
            key_path: "certs/private.pem.key".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed accessors
// ---------------------------------------------------------------------------

impl CalibrationConfig {
    pub fn calibration(&self) -> Calibration {
        Calibration {
            dry: self.dry,
            wet: self.wet,
        }
    }
}

impl WateringConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn pump_duration(&self) -> Duration {
        Duration::from_millis(self.pump_duration_ms)
    }
}

impl DisplayConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

impl MqttConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins on the Raspberry Pi 40-pin header usable as plain outputs.
/// GPIO 0-1 are reserved for the ID EEPROM, 2-3 carry the I2C bus the
/// sensors sit on.
const VALID_RELAY_PINS: &[u8] = &[
    4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// Maximum single-ended reading from the ADS1115 (15-bit unsigned).
const ADS1115_MAX: i32 = 32767;

/// Highest ADS1115 single-ended input (AIN3).
pub const MAX_ADC_CHANNEL: usize = 3;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all sections. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_calibration(&mut errors);
        self.validate_timing(&mut errors);
        self.validate_hardware(&mut errors);
        self.validate_mqtt(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_calibration(&self, errors: &mut Vec<String>) {
        let c = &self.calibration;
        for (name, v) in [("dry", c.dry), ("wet", c.wet)] {
            if !(0..=ADS1115_MAX).contains(&v) {
                errors.push(format!(
                    "calibration.{name} {v} out of ADC range [0, {ADS1115_MAX}]"
                ));
            }
        }
        if c.dry == c.wet {
            errors.push(format!(
                "calibration: dry and wet are both {}, calibration range is zero",
                c.dry
            ));
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        let w = &self.watering;
        if w.dry_threshold > 100 {
            errors.push(format!(
                "watering.dry_threshold {} out of range [0, 100]",
                w.dry_threshold
            ));
        }

        let positive = [
            ("watering.check_interval_ms", w.check_interval_ms),
            ("watering.pump_duration_ms", w.pump_duration_ms),
            ("display.interval_ms", self.display.interval_ms),
        ];
        for (name, v) in positive {
            if v == 0 {
                errors.push(format!("{name} must be positive"));
            }
        }

        if w.pump_duration_ms > 0 && w.pump_duration_ms >= w.check_interval_ms {
            errors.push(format!(
                "watering.pump_duration_ms ({}) must be shorter than check_interval_ms ({})",
                w.pump_duration_ms, w.check_interval_ms
            ));
        }
    }

    fn validate_hardware(&self, errors: &mut Vec<String>) {
        let h = &self.hardware;
        if !VALID_RELAY_PINS.contains(&h.relay_gpio) {
            errors.push(format!(
                "hardware.relay_gpio {} is not a usable BCM GPIO pin (allowed: 4-27)",
                h.relay_gpio
            ));
        }
        if h.adc_channel > MAX_ADC_CHANNEL {
            errors.push(format!(
                "hardware.adc_channel {} out of range (0–{})",
                h.adc_channel,
                MAX_ADC_CHANNEL
            ));
        }
        if h.adc_addr == h.climate_addr {
            errors.push(format!(
                "hardware: adc_addr and climate_addr are both 0x{:02x}",
                h.adc_addr
            ));
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;
        if !m.enabled {
            return;
        }

        let required = [
            ("mqtt.host", &m.host),
            ("mqtt.topic", &m.topic),
            ("mqtt.device_id", &m.device_id),
            ("mqtt.ca_path", &m.ca_path),
            ("mqtt.cert_path", &m.cert_path),
            ("mqtt.key_path", &m.key_path),
        ];
        for (name, v) in required {
            if v.trim().is_empty() {
                errors.push(format!("{name} is empty"));
            }
        }

        if m.port == 0 {
            errors.push("mqtt.port must be non-zero".to_string());
        }
        if m.publish_interval_ms == 0 {
            errors.push("mqtt.publish_interval_ms must be positive".to_string());
        }
        if m.retry_delay_ms == 0 {
            errors.push("mqtt.retry_delay_ms must be positive".to_string());
        }
    }

    /// Apply `MQTT_HOST`, `MQTT_PORT` and `DEVICE_ID` from the environment.
    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = get("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = get("MQTT_PORT") {
            self.mqtt.port = port
                .parse()
                .with_context(|| format!("invalid MQTT_PORT: {port:?}"))?;
        }
        if let Some(id) = get("DEVICE_ID") {
            self.mqtt.device_id = id;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file, then apply env overrides.
/// A missing file falls back to built-in defaults.
pub fn load(path: &str) -> Result<Config> {
    let mut config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        tracing::warn!(path, "config file not found, using defaults");
        Config::default()
    };

    config.apply_env(|k| env::var(k).ok())?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
