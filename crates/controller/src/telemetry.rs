//! Telemetry message and publish cadence.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::link::{Transport, TransportError};
use crate::sensor::Reading;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Flat JSON record pushed to the broker.  Decimal fields are rendered as
/// strings with one fractional digit.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMsg {
    pub soil_hydration: u8,
    pub moisture_status: &'static str,
    pub temperature_f: String,
    pub temperature_c: String,
    pub humidity: String,
}

impl TelemetryMsg {
    pub fn from_reading(r: &Reading) -> Self {
        Self {
            soil_hydration: r.hydration,
            moisture_status: r.level.as_str(),
            temperature_f: format!("{:.1}", r.temp_f()),
            temperature_c: format!("{:.1}", r.temp_c),
            humidity: format!("{:.1}", r.humidity),
        }
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Published,
    /// Publish interval has not elapsed.
    Skipped,
}

pub struct Publisher {
    topic: String,
    interval: Duration,
    last_publish: Instant,
}

impl Publisher {
    pub fn new(topic: impl Into<String>, interval: Duration, start: Instant) -> Self {
        Self {
            topic: topic.into(),
            interval,
            last_publish: start,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish `reading` if the interval has elapsed.
    ///
    /// The timer advances before the attempt, so a failed publish is not
    /// retried until the next interval.  The sample is dropped.
    pub async fn maybe_publish<T: Transport>(
        &mut self,
        reading: &Reading,
        now: Instant,
        transport: &mut T,
    ) -> Result<Outcome, TransportError> {
        if now.saturating_duration_since(self.last_publish) < self.interval {
            return Ok(Outcome::Skipped);
        }
        self.last_publish = now;

        let payload = serde_json::to_vec(&TelemetryMsg::from_reading(reading))?;
        transport.publish(&self.topic, payload).await?;
        Ok(Outcome::Published)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
