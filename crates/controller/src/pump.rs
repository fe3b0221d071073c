//! Pump relay control.  The `hw` feature gates the real rppal GPIO pin; the
//! simulator supplies its own pin otherwise.
//!
//! The relay module is active-low: driving the input LOW closes the contact
//! and runs the pump, HIGH opens it.  The wiring depends on this, so the
//! mapping lives in `relay_level` and nowhere else.

use anyhow::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

#[cfg(feature = "hw")]
use rppal::gpio::{Gpio, OutputPin};

/// Relay input is asserted by pulling it LOW.
pub const RELAY_ACTIVE_LOW: bool = true;

/// Electrical level on the relay input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Pin level that puts the pump in the requested state.
pub fn relay_level(on: bool) -> Level {
    if on == RELAY_ACTIVE_LOW {
        Level::Low
    } else {
        Level::High
    }
}

/// Digital output driving the relay input.
pub trait RelayPin {
    fn write(&mut self, level: Level) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Pump
// ---------------------------------------------------------------------------

pub struct Pump {
    pin: Box<dyn RelayPin>,
    on: bool,
}

impl Pump {
    /// Take ownership of the relay pin and force the pump OFF.
    pub fn new(pin: Box<dyn RelayPin>) -> Result<Self> {
        let mut pump = Self { pin, on: true };
        pump.set(false)?;
        Ok(pump)
    }

    pub fn set(&mut self, on: bool) -> Result<()> {
        self.pin.write(relay_level(on))?;
        self.on = on;
        debug!(pump = if on { "ON" } else { "OFF" }, "relay driven");
        Ok(())
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Run the pump for exactly `duration`.  Holds the caller for the whole
    /// pulse; nothing else in the control loop runs meanwhile.
    pub async fn pulse(&mut self, duration: Duration) -> Result<()> {
        self.set(true)?;
        sleep(duration).await;
        self.set(false)
    }
}

// ---------------------------------------------------------------------------
// Real GPIO relay (rppal, Raspberry Pi header)
// ---------------------------------------------------------------------------

#[cfg(feature = "hw")]
pub struct GpioRelay {
    pin: OutputPin,
}

#[cfg(feature = "hw")]
impl GpioRelay {
    /// Claim BCM pin `bcm` as an output, starting HIGH (relay open).
    pub fn new(bcm: u8) -> Result<Self> {
        let pin = Gpio::new()?.get(bcm)?.into_output_high();
        tracing::info!(gpio = bcm, "pump relay initialised");
        Ok(Self { pin })
    }
}

#[cfg(feature = "hw")]
impl RelayPin for GpioRelay {
    fn write(&mut self, level: Level) -> Result<()> {
        match level {
            Level::Low => self.pin.set_low(),
            Level::High => self.pin.set_high(),
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tokio::time::Instant;

    /// Relay pin that records every level written and when.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingPin {
        pub(crate) writes: Rc<RefCell<Vec<(Instant, Level)>>>,
    }

    impl RecordingPin {
        pub(crate) fn levels(&self) -> Vec<Level> {
            self.writes.borrow().iter().map(|(_, l)| *l).collect()
        }

        /// Number of times the relay was driven to the ON level.
        pub(crate) fn pulses(&self) -> usize {
            self.levels().iter().filter(|l| **l == Level::Low).count()
        }
    }

    impl RelayPin for RecordingPin {
        fn write(&mut self, level: Level) -> Result<()> {
            self.writes.borrow_mut().push((Instant::now(), level));
            Ok(())
        }
    }

    // -- Polarity -------------------------------------------------------------

    #[test]
    fn relay_is_active_low() {
        assert!(RELAY_ACTIVE_LOW);
        assert_eq!(relay_level(true), Level::Low);
        assert_eq!(relay_level(false), Level::High);
    }

    // -- Pump -----------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn new_drives_relay_off() {
        let pin = RecordingPin::default();
        let pump = Pump::new(Box::new(pin.clone())).unwrap();
        assert!(!pump.is_on());
        assert_eq!(pin.levels(), vec![Level::High]);
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_holds_low_for_exact_duration() {
        let pin = RecordingPin::default();
        let mut pump = Pump::new(Box::new(pin.clone())).unwrap();

        pump.pulse(Duration::from_millis(1000)).await.unwrap();

        let writes = pin.writes.borrow();
        assert_eq!(writes.len(), 3);
        let (on_at, on_level) = writes[1];
        let (off_at, off_level) = writes[2];
        assert_eq!(on_level, Level::Low);
        assert_eq!(off_level, Level::High);

        let held = off_at - on_at;
        assert!(
            held >= Duration::from_millis(1000) && held < Duration::from_millis(1005),
            "pump held for {held:?}"
        );
        assert!(!pump.is_on());
    }

    struct BrokenPin;

    impl RelayPin for BrokenPin {
        fn write(&mut self, _level: Level) -> Result<()> {
            anyhow::bail!("gpio unavailable")
        }
    }

    #[test]
    fn new_fails_when_pin_cannot_be_driven() {
        assert!(Pump::new(Box::new(BrokenPin)).is_err());
    }
}
