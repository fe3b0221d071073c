#[cfg(feature = "hw")]
mod adc;
#[cfg(feature = "hw")]
mod aht20;
mod board;
mod config;
mod driver;
mod link;
mod pump;
mod sensor;
#[cfg(all(feature = "sim", not(feature = "hw")))]
mod sim;
mod telemetry;
mod watering;

use anyhow::Result;
use std::{env, thread, time::Duration};
use tokio::time::{sleep, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use driver::{Controller, Uplink};
use link::{MqttLink, Transport};
use pump::Pump;
use sensor::SensorReader;
use telemetry::Publisher;
use watering::WateringTimer;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let boot = Instant::now();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    info!("=================================");
    info!("Auto Plant Watering System v1.0");
    info!("=================================");

    // ── Pump + soil probe ───────────────────────────────────────────
    let (relay, probe) = board::open_pump_and_probe(&cfg)?;
    let pump = Pump::new(relay)?;
    info!(gpio = cfg.hardware.relay_gpio, "pump relay off");

    // ── Climate sensor ──────────────────────────────────────────────
    let climate = match board::open_climate(&cfg) {
        Ok(sensor) => sensor,
        Err(e) => {
            error!("could not find climate sensor: {e:#}");
            error!(
                "check wiring: VDD -> 3.3V, GND -> GND, SDA -> GPIO 2, SCL -> GPIO 3 (addr 0x{:02x})",
                cfg.hardware.climate_addr
            );
            halt();
        }
    };
    info!("climate sensor initialised");

    // ── Broker ──────────────────────────────────────────────────────
    let link = if cfg.mqtt.enabled {
        let mut link = MqttLink::new(&cfg.mqtt)?;
        link.connect().await;
        Some(link)
    } else {
        info!("telemetry disabled");
        None
    };

    sleep(cfg.display.startup_delay()).await;

    // ── Control loop ────────────────────────────────────────────────
    let sensors = SensorReader::new(probe, climate, cfg.calibration.calibration());
    let (watering, publisher) = timers(&cfg, boot);
    let uplink = link.map(|transport| Uplink {
        publisher,
        transport,
    });

    info!(
        dry_threshold = cfg.watering.dry_threshold,
        check_interval_ms = cfg.watering.check_interval_ms,
        pump_duration_ms = cfg.watering.pump_duration_ms,
        "entering control loop"
    );

    Controller::new(sensors, pump, watering, uplink, cfg.display.interval())
        .run()
        .await;
    Ok(())
}

/// Watering and publish timers, both counting from `boot`.  Setup time
/// (broker connect, settle delay) counts toward the first window.
fn timers(cfg: &Config, boot: Instant) -> (WateringTimer, Publisher) {
    let watering = WateringTimer::new(
        boot,
        cfg.watering.check_interval(),
        cfg.watering.pump_duration(),
        cfg.watering.dry_threshold,
    );
    let publisher = Publisher::new(cfg.mqtt.topic.clone(), cfg.mqtt.publish_interval(), boot);
    (watering, publisher)
}

/// Park the process without ever returning.  Nothing useful can run without
/// the climate sensor.
fn halt() -> ! {
    loop {
        thread::sleep(Duration::from_millis(10));
    }
}

// ===========================================================================
// Tests
// ===========================================================================
