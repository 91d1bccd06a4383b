//! Range and rate-of-change rejection with optional rolling smoothing.
//!
//! A filter is owned by one sensor stream and sees its samples in order.
//! Each sample carries two quantities (voltage and concentration for gas
//! sensors, temperature and humidity for the DHT22).
//!
//! 1. Both quantities must lie within their inclusive `[min, max]`.
//! 2. Once a sample has been accepted, each quantity may move at most
//!    `max_step` away from the last accepted value.
//! 3. Accepted samples replace the reference. With a smoothing window larger
//!    than one, the published values are the mean of the populated window.
//!
//! Rejected samples leave the filter untouched.

use thiserror::Error;

use crate::config::Limits;
use crate::sensor::{Quantity, SensorKind};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("{quantity} {value} outside [{min}, {max}]")]
    RangeViolation {
        quantity: Quantity,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("{quantity} changed by {delta} (limit {limit}) since the last accepted sample")]
    RateOfChangeViolation {
        quantity: Quantity,
        delta: f32,
        limit: f32,
    },

    #[error("conversion failed: {0}")]
    Conversion(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Uninitialized,
    Normal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedMeasurement {
    pub sensor: SensorKind,

    /// Values to publish; smoothed when the filter has a window.
    pub values: [f32; 2],

    pub accepted: bool,

    pub reason: Option<Rejection>,
}

impl ValidatedMeasurement {
    pub fn rejected(sensor: SensorKind, values: [f32; 2], reason: Rejection) -> Self {
        Self {
            sensor,
            values,
            accepted: false,
            reason: Some(reason),
        }
    }

    pub fn voltage(&self) -> f32 {
        self.values[0]
    }

    pub fn concentration(&self) -> f32 {
        self.values[1]
    }
}

/// Fixed-capacity circular buffer of accepted samples.
#[derive(Debug, Clone)]
struct SmoothingWindow {
    slots: Vec<[f32; 2]>,
    capacity: usize,
    head: usize,
}

impl SmoothingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    fn push(&mut self, values: [f32; 2]) {
        if self.slots.len() < self.capacity {
            self.slots.push(values);
        } else {
            self.slots[self.head] = values;
        }
        self.head = (self.head + 1) % self.capacity;
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
    }

    fn mean(&self) -> [f32; 2] {
        let n = self.slots.len() as f32;
        let (first, second) = self
            .slots
            .iter()
            .fold((0.0, 0.0), |(a, b), v| (a + v[0], b + v[1]));
        [first / n, second / n]
    }
}

#[derive(Debug, Clone)]
pub struct ValidationFilter {
    sensor: SensorKind,
    limits: [Limits; 2],
    last_accepted: Option<[f32; 2]>,
    window: Option<SmoothingWindow>,
}

impl ValidationFilter {
    /// `smoothing_window` of 0 or 1 publishes accepted samples unchanged.
    pub fn new(sensor: SensorKind, limits: [Limits; 2], smoothing_window: usize) -> Self {
        Self {
            sensor,
            limits,
            last_accepted: None,
            window: (smoothing_window > 1).then(|| SmoothingWindow::new(smoothing_window)),
        }
    }

    pub fn state(&self) -> FilterState {
        if self.last_accepted.is_some() {
            FilterState::Normal
        } else {
            FilterState::Uninitialized
        }
    }

    pub fn last_accepted(&self) -> Option<[f32; 2]> {
        self.last_accepted
    }

    /// Forgets the reference sample and the smoothing history. The next
    /// sample is treated as a first sample. Called whenever the conversion
    /// behind the filter changes, e.g. after a new baseline.
    pub fn reset(&mut self) {
        self.last_accepted = None;
        if let Some(window) = &mut self.window {
            window.clear();
        }
    }

    pub fn process(&mut self, values: [f32; 2]) -> ValidatedMeasurement {
        if let Err(reason) = self.check(values) {
            return ValidatedMeasurement::rejected(self.sensor, values, reason);
        }

        self.last_accepted = Some(values);
        let published = match &mut self.window {
            Some(window) => {
                window.push(values);
                window.mean()
            }
            None => values,
        };

        ValidatedMeasurement {
            sensor: self.sensor,
            values: published,
            accepted: true,
            reason: None,
        }
    }

    fn check(&self, values: [f32; 2]) -> Result<(), Rejection> {
        let quantities = self.sensor.quantities();

        for ((&value, limits), quantity) in values.iter().zip(&self.limits).zip(quantities) {
            if !(limits.min..=limits.max).contains(&value) {
                return Err(Rejection::RangeViolation {
                    quantity,
                    value,
                    min: limits.min,
                    max: limits.max,
                });
            }
        }

        let Some(previous) = self.last_accepted else {
            return Ok(());
        };

        for (((&value, &last), limits), quantity) in values
            .iter()
            .zip(&previous)
            .zip(&self.limits)
            .zip(quantities)
        {
            let delta = (value - last).abs();
            if delta > limits.max_step {
                return Err(Rejection::RateOfChangeViolation {
                    quantity,
                    delta,
                    limit: limits.max_step,
                });
            }
        }

        Ok(())
    }
}
