use chrono::DateTime;
use chrono_tz::Tz;

use crate::sensor::SensorKind;

/// One raw poll result, consumed by the cycle that produced it.
#[derive(Debug, Clone)]
pub struct SensorReading<R> {
    pub sensor: SensorKind,

    pub raw: R,

    pub measured_at: DateTime<Tz>,
}

/// Raw output of the DHT22, already in physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateRaw {
    pub temperature_celsius: f32,

    pub humidity_percent: f32,
}
