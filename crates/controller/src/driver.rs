//! Control loop: one sequential task that reads the sensors, decides on
//! watering and pushes telemetry, then sleeps for the display interval.
//!
//! Every step is awaited to completion before the next one starts, so a
//! pump pulse or a reconnect holds up the whole iteration.

use anyhow::Result;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::link::{ensure_connected, Transport};
use crate::pump::Pump;
use crate::sensor::{Reading, SensorReader};
use crate::telemetry::{Outcome, Publisher};
use crate::watering::{Decision, WateringTimer};

/// Broker transport paired with its publish cadence.
pub struct Uplink<T> {
    pub publisher: Publisher,
    pub transport: T,
}

/// What happened to telemetry during one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryStatus {
    /// Link was down at publish time; nothing attempted.
    Offline,
    Sent(Outcome),
    /// Publish attempted and rejected.  The sample is dropped.
    Failed,
}

/// Summary of one `Controller::tick`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Iteration {
    /// `None` when no reading has ever succeeded.
    pub reading: Option<Reading>,
    /// The sensors failed and `reading` is the previous good one.
    pub stale: bool,
    pub decision: Option<Decision>,
    /// `None` with telemetry disabled or the iteration skipped.
    pub telemetry: Option<TelemetryStatus>,
}

impl Iteration {
    fn skipped() -> Self {
        Self {
            reading: None,
            stale: false,
            decision: None,
            telemetry: None,
        }
    }
}

pub struct Controller<T> {
    sensors: SensorReader,
    pump: Pump,
    watering: WateringTimer,
    uplink: Option<Uplink<T>>,
    last_reading: Option<Reading>,
    display_interval: Duration,
}

impl<T: Transport> Controller<T> {
    pub fn new(
        sensors: SensorReader,
        pump: Pump,
        watering: WateringTimer,
        uplink: Option<Uplink<T>>,
        display_interval: Duration,
    ) -> Self {
        Self {
            sensors,
            pump,
            watering,
            uplink,
            last_reading: None,
            display_interval,
        }
    }

    /// One pass: connectivity, sensors, status log, watering, telemetry.
    pub async fn tick(&mut self) -> Result<Iteration> {
        if let Some(uplink) = self.uplink.as_mut() {
            ensure_connected(&mut uplink.transport).await;
        }

        let (reading, stale) = match self.sensors.read() {
            Ok(r) => {
                self.last_reading = Some(r);
                (r, false)
            }
            Err(e) => match self.last_reading {
                Some(r) => {
                    warn!("sensor read failed, reusing last reading: {e:#}");
                    (r, true)
                }
                None => {
                    warn!("sensor read failed and no reading yet, skipping iteration: {e:#}");
                    return Ok(Iteration::skipped());
                }
            },
        };

        log_status(&reading, stale);

        let decision = self.watering.evaluate(reading.hydration, Instant::now());
        match decision {
            Decision::Water => {
                let duration = self.watering.pump_duration();
                info!(
                    hydration = reading.hydration,
                    threshold = self.watering.dry_threshold(),
                    duration_ms = duration.as_millis() as u64,
                    "watering activated"
                );
                self.pump.pulse(duration).await?;
                info!("watering complete");
            }
            Decision::Satisfied => info!("soil moisture ok, no watering needed"),
            Decision::NotDue => {}
        }

        let telemetry = match self.uplink.as_mut() {
            None => None,
            Some(uplink) if !uplink.transport.is_connected() => {
                debug!("broker link down, telemetry not attempted");
                Some(TelemetryStatus::Offline)
            }
            Some(uplink) => {
                let result = uplink
                    .publisher
                    .maybe_publish(&reading, Instant::now(), &mut uplink.transport)
                    .await;
                Some(match result {
                    Ok(outcome) => {
                        if outcome == Outcome::Published {
                            info!(topic = uplink.publisher.topic(), "telemetry published");
                        }
                        TelemetryStatus::Sent(outcome)
                    }
                    Err(e) => {
                        warn!(topic = uplink.publisher.topic(), "telemetry publish failed: {e}");
                        TelemetryStatus::Failed
                    }
                })
            }
        };

        Ok(Iteration {
            reading: Some(reading),
            stale,
            decision: Some(decision),
            telemetry,
        })
    }

    /// Tick forever, sleeping the display interval between passes.
    pub async fn run(mut self) {
        loop {
            match self.tick().await {
                Ok(it) => debug!(
                    hydration = it.reading.map(|r| r.hydration),
                    stale = it.stale,
                    decision = ?it.decision,
                    telemetry = ?it.telemetry,
                    "iteration complete"
                ),
                Err(e) => {
                    error!("iteration failed: {e:#}");
                    if self.pump.is_on() {
                        if let Err(e) = self.pump.set(false) {
                            error!("failed to switch pump off: {e:#}");
                        }
                    }
                }
            }
            sleep(self.display_interval).await;
        }
    }
}

fn log_status(r: &Reading, stale: bool) {
    info!(
        raw = r.raw_soil,
        stale,
        "soil hydration: {}% [{}]",
        r.hydration,
        r.level
    );
    info!("temperature: {:.1}°F ({:.1}°C)", r.temp_f(), r.temp_c);
    info!("humidity: {:.1}%", r.humidity);
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::tests::MockTransport;
    use crate::pump::tests::RecordingPin;
    use crate::sensor::{Calibration, ClimateSample, ClimateSensor, SoilProbe};
    use std::collections::VecDeque;

    const CAL: Calibration = Calibration { dry: 4095, wet: 0 };
    const CHECK: Duration = Duration::from_secs(15);
    const PULSE: Duration = Duration::from_secs(1);
    const PUBLISH: Duration = Duration::from_secs(30);
    const DISPLAY: Duration = Duration::from_secs(2);

    /// 10 % hydration against `CAL`.
    const RAW_DRY: i32 = 3685;
    /// 80 % hydration against `CAL`.
    const RAW_MOIST: i32 = 819;

    /// Replays a script of raw readings; `None` and an exhausted script fail.
    struct ScriptedSoil {
        script: VecDeque<Option<i32>>,
        repeat_last: bool,
        last: Option<i32>,
    }

    impl ScriptedSoil {
        fn steady(raw: i32) -> Self {
            Self {
                script: VecDeque::new(),
                repeat_last: true,
                last: Some(raw),
            }
        }

        fn script(items: &[Option<i32>]) -> Self {
            Self {
                script: items.iter().copied().collect(),
                repeat_last: false,
                last: None,
            }
        }
    }

    impl SoilProbe for ScriptedSoil {
        fn read_raw(&mut self) -> Result<i32> {
            let next = match self.script.pop_front() {
                Some(item) => item,
                None if self.repeat_last => self.last,
                None => None,
            };
            next.ok_or_else(|| anyhow::anyhow!("adc timeout"))
        }
    }

    struct RoomClimate;

    impl ClimateSensor for RoomClimate {
        fn sample(&mut self) -> Result<ClimateSample> {
            Ok(ClimateSample {
                temp_c: 22.5,
                humidity: 55.0,
            })
        }
    }

    fn controller(
        soil: ScriptedSoil,
        pin: &RecordingPin,
        transport: Option<MockTransport>,
    ) -> Controller<MockTransport> {
        let start = Instant::now();
        let sensors = SensorReader::new(Box::new(soil), Box::new(RoomClimate), CAL);
        let pump = Pump::new(Box::new(pin.clone())).unwrap();
        let watering = WateringTimer::new(start, CHECK, PULSE, 40);
        let uplink = transport.map(|transport| Uplink {
            publisher: Publisher::new("plant/telemetry", PUBLISH, start),
            transport,
        });
        Controller::new(sensors, pump, watering, uplink, DISPLAY)
    }

    fn connected() -> MockTransport {
        MockTransport {
            connected: true,
            ..Default::default()
        }
    }

    /// Drive the loop the way `run` does until `span` has elapsed.
    async fn run_for(ctl: &mut Controller<MockTransport>, span: Duration) -> Vec<Iteration> {
        let end = Instant::now() + span;
        let mut out = Vec::new();
        while Instant::now() < end {
            out.push(ctl.tick().await.unwrap());
            sleep(DISPLAY).await;
        }
        out
    }

    // -- Watering -------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn dry_soil_gets_one_pulse_per_window() {
        let pin = RecordingPin::default();
        let mut ctl = controller(ScriptedSoil::steady(RAW_DRY), &pin, None);

        run_for(&mut ctl, Duration::from_secs(61)).await;

        assert_eq!(pin.pulses(), 3);
        let writes = pin.writes.borrow();
        let ons: Vec<Instant> = writes
            .iter()
            .filter(|(_, l)| *l == crate::pump::Level::Low)
            .map(|(at, _)| *at)
            .collect();
        for pair in ons.windows(2) {
            assert!(pair[1] - pair[0] >= CHECK, "pulses too close: {:?}", pair[1] - pair[0]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn moist_soil_is_evaluated_but_not_watered() {
        let pin = RecordingPin::default();
        let mut ctl = controller(ScriptedSoil::steady(RAW_MOIST), &pin, Some(connected()));

        let iters = run_for(&mut ctl, Duration::from_secs(61)).await;

        let evaluated = iters
            .iter()
            .filter(|it| it.decision == Some(Decision::Satisfied))
            .count();
        let published = iters
            .iter()
            .filter(|it| it.telemetry == Some(TelemetryStatus::Sent(Outcome::Published)))
            .count();
        assert_eq!(evaluated, 3);
        assert_eq!(published, 2);
        assert_eq!(pin.pulses(), 0);

        let sent = ctl.uplink.as_ref().unwrap().transport.sent.borrow().clone();
        assert_eq!(sent.len(), 2);
        let json: serde_json::Value = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(json["soilHydration"], 80);
        assert_eq!(json["moistureStatus"], "MOIST");
        assert_eq!(json["temperatureF"], "72.5");
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_disabled_reports_nothing() {
        let pin = RecordingPin::default();
        let mut ctl = controller(ScriptedSoil::steady(RAW_MOIST), &pin, None);
        sleep(PUBLISH).await;

        let it = ctl.tick().await.unwrap();
        assert_eq!(it.telemetry, None);
        assert_eq!(it.decision, Some(Decision::Satisfied));
    }

    // -- Connectivity ---------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn reconnect_blocks_then_iteration_proceeds() {
        let pin = RecordingPin::default();
        let transport = MockTransport {
            connect_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let mut ctl = controller(ScriptedSoil::steady(RAW_DRY), &pin, Some(transport));
        let t0 = Instant::now();
        sleep(Duration::from_secs(20)).await;

        let it = ctl.tick().await.unwrap();

        assert!(Instant::now() - t0 >= Duration::from_secs(31));
        assert_eq!(it.decision, Some(Decision::Water));
        assert_eq!(it.telemetry, Some(TelemetryStatus::Sent(Outcome::Published)));
        assert_eq!(pin.pulses(), 1);

        let transport = &ctl.uplink.as_ref().unwrap().transport;
        assert_eq!(transport.connects, 1);
        assert_eq!(transport.sent.borrow().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn link_drop_mid_iteration_skips_publish_but_waters() {
        let pin = RecordingPin::default();
        let transport = MockTransport {
            connected: true,
            liveness: std::cell::RefCell::new(VecDeque::from([true, false])),
            ..Default::default()
        };
        let mut ctl = controller(ScriptedSoil::steady(RAW_DRY), &pin, Some(transport));
        sleep(PUBLISH).await;

        let it = ctl.tick().await.unwrap();

        assert_eq!(it.decision, Some(Decision::Water));
        assert_eq!(it.telemetry, Some(TelemetryStatus::Offline));
        assert_eq!(pin.pulses(), 1);
        let transport = &ctl.uplink.as_ref().unwrap().transport;
        assert_eq!(transport.connects, 0);
        assert!(transport.sent.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_publish_is_dropped_until_next_interval() {
        let pin = RecordingPin::default();
        let transport = MockTransport {
            fail_publish: true,
            ..connected()
        };
        let mut ctl = controller(ScriptedSoil::steady(RAW_MOIST), &pin, Some(transport));
        sleep(PUBLISH).await;

        let it = ctl.tick().await.unwrap();
        assert_eq!(it.telemetry, Some(TelemetryStatus::Failed));

        ctl.uplink.as_mut().unwrap().transport.fail_publish = false;
        sleep(DISPLAY).await;
        let it = ctl.tick().await.unwrap();
        assert_eq!(it.telemetry, Some(TelemetryStatus::Sent(Outcome::Skipped)));
        assert!(ctl.uplink.as_ref().unwrap().transport.sent.borrow().is_empty());
    }

    // -- Sensor failures ------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn transient_read_failure_reuses_last_reading() {
        let pin = RecordingPin::default();
        let soil = ScriptedSoil::script(&[Some(RAW_DRY), None]);
        let mut ctl = controller(soil, &pin, None);

        let first = ctl.tick().await.unwrap();
        assert!(!first.stale);
        assert_eq!(first.reading.map(|r| r.hydration), Some(10));

        sleep(CHECK).await;
        let second = ctl.tick().await.unwrap();
        assert!(second.stale);
        assert_eq!(second.reading, first.reading);
        assert_eq!(second.decision, Some(Decision::Water));
        assert_eq!(pin.pulses(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_reading_yet_skips_iteration() {
        let pin = RecordingPin::default();
        let mut ctl = controller(ScriptedSoil::script(&[]), &pin, Some(connected()));
        sleep(PUBLISH).await;

        let it = ctl.tick().await.unwrap();

        assert_eq!(it, Iteration::skipped());
        assert_eq!(pin.pulses(), 0);
        assert!(ctl.uplink.as_ref().unwrap().transport.sent.borrow().is_empty());
    }
}
