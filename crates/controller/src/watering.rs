//! Watering cadence: decides, once per check window, whether the soil is dry
//! enough to run a pump pulse.
//!
//! ```text
//! NotDue ──[check_interval elapsed]──▶ evaluate ──[hydration < threshold]──▶ Water
//!                                          │
//!                                          └──────[otherwise]──▶ Satisfied
//! ```
//!
//! The window restarts on every evaluation regardless of the outcome, so a
//! plant that stays dry gets one pulse per window, not one per loop cycle.

use std::time::Duration;
use tokio::time::Instant;

/// Outcome of one `WateringTimer::evaluate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The check window has not elapsed yet.
    NotDue,
    /// Window elapsed, soil is wet enough.
    Satisfied,
    /// Window elapsed and soil is below the dry threshold.
    Water,
}

#[derive(Debug)]
pub struct WateringTimer {
    last_check: Instant,
    check_interval: Duration,
    pump_duration: Duration,
    dry_threshold: u8,
}

impl WateringTimer {
    /// The first window opens at `start`.
    pub fn new(
        start: Instant,
        check_interval: Duration,
        pump_duration: Duration,
        dry_threshold: u8,
    ) -> Self {
        Self {
            last_check: start,
            check_interval,
            pump_duration,
            dry_threshold,
        }
    }

    pub fn evaluate(&mut self, hydration: u8, now: Instant) -> Decision {
        if now.saturating_duration_since(self.last_check) < self.check_interval {
            return Decision::NotDue;
        }
        self.last_check = now;

        if hydration < self.dry_threshold {
            Decision::Water
        } else {
            Decision::Satisfied
        }
    }

    pub fn pump_duration(&self) -> Duration {
        self.pump_duration
    }

    pub fn dry_threshold(&self) -> u8 {
        self.dry_threshold
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: Duration = Duration::from_millis(15_000);
    const PULSE: Duration = Duration::from_millis(1_000);

    fn timer(start: Instant) -> WateringTimer {
        WateringTimer::new(start, CHECK, PULSE, 40)
    }

    #[test]
    fn not_due_before_interval() {
        let t0 = Instant::now();
        let mut w = timer(t0);
        assert_eq!(w.evaluate(0, t0), Decision::NotDue);
        assert_eq!(w.evaluate(0, t0 + Duration::from_millis(14_999)), Decision::NotDue);
    }

    #[test]
    fn due_exactly_at_interval() {
        let t0 = Instant::now();
        let mut w = timer(t0);
        assert_eq!(w.evaluate(10, t0 + CHECK), Decision::Water);
    }

    #[test]
    fn threshold_is_strict() {
        let t0 = Instant::now();
        let mut w = timer(t0);
        assert_eq!(w.evaluate(39, t0 + CHECK), Decision::Water);

        let mut w = timer(t0);
        assert_eq!(w.evaluate(40, t0 + CHECK), Decision::Satisfied);
    }

    #[test]
    fn satisfied_evaluation_still_restarts_window() {
        let t0 = Instant::now();
        let mut w = timer(t0);
        let first = t0 + CHECK;
        assert_eq!(w.evaluate(90, first), Decision::Satisfied);

        // Soil dries out right after; must wait a full window from `first`.
        assert_eq!(w.evaluate(5, first + Duration::from_millis(2_000)), Decision::NotDue);
        assert_eq!(w.evaluate(5, first + CHECK), Decision::Water);
    }

    #[test]
    fn one_pulse_per_window_while_dry() {
        // 2 s loop cycles, hydration pinned at 10 %, 60 s of decisions.
        let t0 = Instant::now();
        let mut w = timer(t0);
        let fired: Vec<u64> = (0..=30)
            .map(|i| Duration::from_secs(i * 2))
            .filter(|at| w.evaluate(10, t0 + *at) == Decision::Water)
            .map(|at| at.as_secs())
            .collect();
        assert_eq!(fired, vec![16, 32, 48]);
    }

    #[test]
    fn accessors() {
        let w = timer(Instant::now());
        assert_eq!(w.pump_duration(), PULSE);
        assert_eq!(w.dry_threshold(), 40);
    }
}
