//! ADC count to voltage, sensor resistance and gas concentration.
//!
//! ```text
//! voltage = raw * (Vref / resolution)
//! Rs      = (Vref - voltage) * R_load / voltage
//! ppm     = A * (Rs / Ro) ^ B
//! ```
//!
//! Everything here is pure; the baseline `Ro` is supplied by the caller.

use crate::config::GasProfile;
use crate::error::{Error, Result};

/// Power law fitted to the datasheet Rs/Ro curve of one gas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Curve {
    pub a: f32,
    pub b: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionModel {
    pub vref: f32,
    pub resolution: f32,
    pub load_resistance: f32,
    pub curve: Curve,
}

/// Intermediate values of one conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub voltage: f32,
    pub resistance: f32,
    pub ppm: f32,
}

impl ConversionModel {
    pub fn from_profile(profile: &GasProfile) -> Self {
        Self {
            vref: profile.vref,
            resolution: profile.resolution,
            load_resistance: profile.load_resistance,
            curve: Curve {
                a: profile.curve_a,
                b: profile.curve_b,
            },
        }
    }

    #[inline]
    pub fn voltage(&self, raw: u16) -> f32 {
        raw as f32 * (self.vref / self.resolution)
    }

    pub fn resistance(&self, voltage: f32) -> Result<f32> {
        if voltage.is_nan() || voltage <= 0.0 {
            return Err(Error::DivisionSingularity { voltage });
        }

        let resistance = (self.vref - voltage) * self.load_resistance / voltage;
        if resistance.is_nan() || resistance <= 0.0 {
            return Err(Error::NonPhysicalResistance {
                voltage,
                resistance,
            });
        }

        Ok(resistance)
    }

    #[inline]
    pub fn concentration(&self, resistance: f32, baseline: f32) -> f32 {
        self.curve.a * (resistance / baseline).powf(self.curve.b)
    }

    pub fn convert(&self, raw: u16, baseline: f32) -> Result<Conversion> {
        let voltage = self.voltage(raw);
        let resistance = self.resistance(voltage)?;
        let ppm = self.concentration(resistance, baseline);

        Ok(Conversion {
            voltage,
            resistance,
            ppm,
        })
    }
}
