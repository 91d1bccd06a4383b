//! Clean-air baseline calibration of resistive gas sensors.

use chrono::DateTime;
use chrono_tz::Tz;
use tracing::info;

use crate::config::GasProfile;
use crate::conversion::{Conversion, ConversionModel};
use crate::error::{Error, Result};
use crate::sensor::SensorKind;

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationState {
    pub sensor: SensorKind,

    /// Ro in ohms. Always positive and finite.
    pub baseline_resistance: f32,

    /// `None` while the configured default baseline is in use.
    pub calibrated_at: Option<DateTime<Tz>>,
}

/// A resistive gas sensor: its conversion model plus the baseline it owns.
#[derive(Debug, Clone)]
pub struct GasSensor {
    kind: SensorKind,
    model: ConversionModel,
    clean_air_ratio: f32,
    state: CalibrationState,
}

impl GasSensor {
    pub fn new(kind: SensorKind, profile: &GasProfile) -> Self {
        Self {
            kind,
            model: ConversionModel::from_profile(profile),
            clean_air_ratio: profile.clean_air_ratio,
            state: CalibrationState {
                sensor: kind,
                baseline_resistance: profile.default_baseline,
                calibrated_at: None,
            },
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn convert(&self, raw: u16) -> Result<Conversion> {
        self.model.convert(raw, self.state.baseline_resistance)
    }

    /// Treats `raw` as a clean-air sample and derives a new baseline from it.
    ///
    /// On error the previous baseline is kept.
    pub fn calibrate(&mut self, raw: u16, at: DateTime<Tz>) -> Result<f32> {
        let baseline = self
            .baseline_from_sample(raw)
            .map_err(|source| Error::Calibration {
                sensor: self.kind,
                source: Box::new(source),
            })?;

        info!(
            sensor = %self.kind,
            raw,
            previous = self.state.baseline_resistance,
            baseline,
            "calibrated baseline resistance"
        );

        self.state.baseline_resistance = baseline;
        self.state.calibrated_at = Some(at);

        Ok(baseline)
    }

    fn baseline_from_sample(&self, raw: u16) -> Result<f32> {
        let voltage = self.model.voltage(raw);
        let resistance = self.model.resistance(voltage)?;
        let baseline = resistance / self.clean_air_ratio;

        if !(baseline.is_finite() && baseline > 0.0) {
            return Err(Error::InvalidBaseline {
                sensor: self.kind,
                baseline,
            });
        }

        Ok(baseline)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    fn at() -> DateTime<Tz> {
        Tz::UTC.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn starts_from_default_baseline() {
        let sensor = GasSensor::new(SensorKind::Mq4, &GasProfile::mq4());

        assert_eq!(sensor.state().baseline_resistance, 10_000.0);
        assert_eq!(sensor.state().calibrated_at, None);
    }

    #[test]
    fn divides_sample_resistance_by_clean_air_ratio() {
        let mut sensor = GasSensor::new(SensorKind::Mq4, &GasProfile::mq4());

        let baseline = sensor.calibrate(2048, at()).unwrap();

        // 9995.12 / 9.83
        assert!((baseline - 1_016.80).abs() < 0.1, "baseline = {baseline}");
        assert_eq!(sensor.state().baseline_resistance, baseline);
        assert_eq!(sensor.state().calibrated_at, Some(at()));
    }

    #[test]
    fn calibrated_sample_reads_back_as_clean_air() {
        let profile = GasProfile::mq7();
        let mut sensor = GasSensor::new(SensorKind::Mq7, &profile);
        sensor.calibrate(1500, at()).unwrap();

        let ppm = sensor.convert(1500).unwrap().ppm;
        let expected = profile.curve_a * profile.clean_air_ratio.powf(profile.curve_b);

        assert!((ppm - expected).abs() / expected < 1e-4);
    }

    #[test]
    fn failed_calibration_keeps_previous_baseline() {
        let mut sensor = GasSensor::new(SensorKind::Mq7, &GasProfile::mq7());

        let err = sensor.calibrate(0, at()).unwrap_err();

        assert!(matches!(err, Error::Calibration { .. }));
        assert_eq!(sensor.state().baseline_resistance, 10_000.0);
        assert_eq!(sensor.state().calibrated_at, None);
    }

    #[test]
    fn saturated_sample_is_not_a_baseline() {
        let mut sensor = GasSensor::new(SensorKind::Mq4, &GasProfile::mq4());
        sensor.calibrate(2048, at()).unwrap();
        let before = sensor.state().clone();

        assert!(sensor.calibrate(4095, at()).is_err());
        assert_eq!(sensor.state(), &before);
    }
}
