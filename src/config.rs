//! Runtime configuration.
//!
//! Every value has a default matching the reference hardware wiring, so an absent or
//! partial TOML file is valid. Command line arguments of the binary override
//! the top level fields after loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::sensor::SensorKind;

pub const DEFAULT_IIO_DEVICE: &str = "/sys/bus/iio/devices/iio:device0";
pub const DEFAULT_DHT_IIO_DEVICE: &str = "/sys/bus/iio/devices/iio:device1";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub storage_dir: PathBuf,

    pub timezone: Tz,

    #[serde(with = "humantime_serde")]
    pub run_duration: Duration,

    #[serde(with = "humantime_serde")]
    pub writer_interval: Duration,

    pub time_sync: TimeSyncConfig,

    /// Command run after the supervisor halts, e.g. `["systemctl", "suspend"]`.
    pub halt_command: Option<Vec<String>>,

    pub log_level: String,

    pub sensors: SensorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeSyncConfig {
    pub attempts: u32,

    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(from = "SensorsFile")]
pub struct SensorsConfig {
    pub dht22: ClimateProfile,

    pub mq4: GasProfile,

    pub mq7: GasProfile,
}

/// Inclusive bounds and the largest step allowed between two accepted samples.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    pub min: f32,
    pub max: f32,
    pub max_step: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClimateProfile {
    pub iio_device: PathBuf,

    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    pub temperature: Limits,

    pub humidity: Limits,

    pub smoothing_window: usize,
}

/// Constants of one resistive gas sensor model and its wiring.
#[derive(Debug, Clone)]
pub struct GasProfile {
    pub iio_device: PathBuf,

    pub channel: u32,

    pub poll_interval: Duration,

    pub vref: f32,

    pub resolution: f32,

    pub load_resistance: f32,

    pub curve_a: f32,

    pub curve_b: f32,

    /// Rs/Ro in clean air, read off the datasheet curve.
    pub clean_air_ratio: f32,

    /// Baseline used until a calibration succeeds.
    pub default_baseline: f32,

    pub voltage: Limits,

    pub concentration: Limits,

    pub smoothing_window: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("/var/lib/air-logger"),
            timezone: Tz::America__Sao_Paulo,
            run_duration: Duration::from_secs(60 * 60),
            writer_interval: Duration::from_secs(10),
            time_sync: TimeSyncConfig::default(),
            halt_command: None,
            log_level: "info".to_string(),
            sensors: SensorsConfig::default(),
        }
    }
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            dht22: ClimateProfile::default(),
            mq4: GasProfile::mq4(),
            mq7: GasProfile::mq7(),
        }
    }
}

impl Default for ClimateProfile {
    fn default() -> Self {
        Self {
            iio_device: PathBuf::from(DEFAULT_DHT_IIO_DEVICE),
            poll_interval: Duration::from_secs(2),
            temperature: Limits {
                min: -40.0,
                max: 80.0,
                max_step: 5.0,
            },
            humidity: Limits {
                min: 0.0,
                max: 100.0,
                max_step: 15.0,
            },
            smoothing_window: 1,
        }
    }
}

/// Gas sensor tables in the file only override the model's own defaults, so
/// `[sensors.mq7]` with just a channel still carries the MQ-7 curve.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SensorsFile {
    dht22: ClimateProfile,
    mq4: GasOverrides,
    mq7: GasOverrides,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct GasOverrides {
    iio_device: Option<PathBuf>,
    channel: Option<u32>,
    #[serde(with = "humantime_serde")]
    poll_interval: Option<Duration>,
    vref: Option<f32>,
    resolution: Option<f32>,
    load_resistance: Option<f32>,
    curve_a: Option<f32>,
    curve_b: Option<f32>,
    clean_air_ratio: Option<f32>,
    default_baseline: Option<f32>,
    voltage: Option<Limits>,
    concentration: Option<Limits>,
    smoothing_window: Option<usize>,
}

impl GasOverrides {
    fn apply(self, base: GasProfile) -> GasProfile {
        GasProfile {
            iio_device: self.iio_device.unwrap_or(base.iio_device),
            channel: self.channel.unwrap_or(base.channel),
            poll_interval: self.poll_interval.unwrap_or(base.poll_interval),
            vref: self.vref.unwrap_or(base.vref),
            resolution: self.resolution.unwrap_or(base.resolution),
            load_resistance: self.load_resistance.unwrap_or(base.load_resistance),
            curve_a: self.curve_a.unwrap_or(base.curve_a),
            curve_b: self.curve_b.unwrap_or(base.curve_b),
            clean_air_ratio: self.clean_air_ratio.unwrap_or(base.clean_air_ratio),
            default_baseline: self.default_baseline.unwrap_or(base.default_baseline),
            voltage: self.voltage.unwrap_or(base.voltage),
            concentration: self.concentration.unwrap_or(base.concentration),
            smoothing_window: self.smoothing_window.unwrap_or(base.smoothing_window),
        }
    }
}

impl From<SensorsFile> for SensorsConfig {
    fn from(file: SensorsFile) -> Self {
        Self {
            dht22: file.dht22,
            mq4: file.mq4.apply(GasProfile::mq4()),
            mq7: file.mq7.apply(GasProfile::mq7()),
        }
    }
}

impl GasProfile {
    /// MQ-4 methane sensor on ADC channel 6 with a 10 kOhm load.
    pub fn mq4() -> Self {
        Self {
            iio_device: PathBuf::from(DEFAULT_IIO_DEVICE),
            channel: 6,
            poll_interval: Duration::from_secs(10),
            vref: 3.3,
            resolution: 4095.0,
            load_resistance: 10_000.0,
            curve_a: 625.0,
            curve_b: -2.1,
            clean_air_ratio: 9.83,
            default_baseline: 10_000.0,
            voltage: Limits {
                min: 0.05,
                max: 3.25,
                max_step: 0.5,
            },
            concentration: Limits {
                min: 0.0,
                max: 10_000.0,
                max_step: 1_000.0,
            },
            smoothing_window: 5,
        }
    }

    /// MQ-7 carbon monoxide sensor on ADC channel 7 with a 10 kOhm load.
    pub fn mq7() -> Self {
        Self {
            channel: 7,
            curve_a: 99.042,
            curve_b: -1.518,
            clean_air_ratio: 27.5,
            concentration: Limits {
                min: 0.0,
                max: 2_000.0,
                max_step: 200.0,
            },
            ..Self::mq4()
        }
    }

    pub fn limits(&self) -> [Limits; 2] {
        [self.voltage, self.concentration]
    }
}

impl ClimateProfile {
    pub fn limits(&self) -> [Limits; 2] {
        [self.temperature, self.humidity]
    }
}

impl Config {
    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {path:?}: {e}")))?;

        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn poll_interval(&self, sensor: SensorKind) -> Duration {
        match sensor {
            SensorKind::Dht22 => self.sensors.dht22.poll_interval,
            SensorKind::Mq4 => self.sensors.mq4.poll_interval,
            SensorKind::Mq7 => self.sensors.mq7.poll_interval,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.run_duration.is_zero() {
            return Err(Error::Config("run_duration must be positive".into()));
        }
        if self.writer_interval.is_zero() {
            return Err(Error::Config("writer_interval must be positive".into()));
        }
        if self.time_sync.attempts == 0 {
            return Err(Error::Config("time_sync.attempts must be at least 1".into()));
        }
        if let Some(command) = &self.halt_command
            && command.is_empty()
        {
            return Err(Error::Config("halt_command must not be empty".into()));
        }

        // The writer samples the store without a queue, so it must not tick
        // faster than any producer.
        for sensor in SensorKind::ALL {
            let poll = self.poll_interval(sensor);
            if poll.is_zero() {
                return Err(Error::Config(format!(
                    "{sensor}: poll_interval must be positive"
                )));
            }
            if self.writer_interval < poll {
                return Err(Error::Config(format!(
                    "writer_interval {:?} is shorter than the {sensor} poll interval {:?}",
                    self.writer_interval, poll
                )));
            }
        }

        let climate = &self.sensors.dht22;
        validate_limits(SensorKind::Dht22, "temperature", &climate.temperature)?;
        validate_limits(SensorKind::Dht22, "humidity", &climate.humidity)?;

        validate_gas(SensorKind::Mq4, &self.sensors.mq4)?;
        validate_gas(SensorKind::Mq7, &self.sensors.mq7)?;

        Ok(())
    }
}

fn validate_gas(sensor: SensorKind, profile: &GasProfile) -> Result<()> {
    let positive = [
        ("vref", profile.vref),
        ("resolution", profile.resolution),
        ("load_resistance", profile.load_resistance),
        ("curve_a", profile.curve_a),
        ("clean_air_ratio", profile.clean_air_ratio),
        ("default_baseline", profile.default_baseline),
    ];
    for (name, value) in positive {
        if !(value.is_finite() && value > 0.0) {
            return Err(Error::Config(format!(
                "{sensor}: {name} must be a positive number, got {value}"
            )));
        }
    }
    if !profile.curve_b.is_finite() {
        return Err(Error::Config(format!("{sensor}: curve_b must be finite")));
    }

    validate_limits(sensor, "voltage", &profile.voltage)?;
    validate_limits(sensor, "concentration", &profile.concentration)
}

fn validate_limits(sensor: SensorKind, name: &str, limits: &Limits) -> Result<()> {
    if !(limits.min.is_finite() && limits.max.is_finite() && limits.min <= limits.max) {
        return Err(Error::Config(format!(
            "{sensor}: {name} limits [{}, {}] are empty",
            limits.min, limits.max
        )));
    }
    if !(limits.max_step.is_finite() && limits.max_step >= 0.0) {
        return Err(Error::Config(format!(
            "{sensor}: {name} max_step must be non-negative"
        )));
    }

    Ok(())
}
