//! Raw sensor sources.
//!
//! On Linux both the ADC and the DHT22 are exposed through the industrial
//! I/O subsystem as sysfs attributes, so a read is a small file read.

use std::future::Future;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{Error, Result};
use crate::sensor::{ClimateRaw, SensorKind};

/// Yields one raw reading per call, or a transient failure.
pub trait RawSensorSource: Send + 'static {
    type Raw: Copy + Send + std::fmt::Debug + 'static;

    fn sensor(&self) -> SensorKind;

    fn read(&mut self) -> impl Future<Output = Result<Self::Raw>> + Send;
}

/// One channel of an IIO ADC (`in_voltage<N>_raw`).
#[derive(Debug, Clone)]
pub struct IioAdcChannel {
    sensor: SensorKind,
    path: PathBuf,
}

impl IioAdcChannel {
    pub fn new(sensor: SensorKind, device_dir: &Path, channel: u32) -> Self {
        Self {
            sensor,
            path: device_dir.join(format!("in_voltage{channel}_raw")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RawSensorSource for IioAdcChannel {
    type Raw = u16;

    fn sensor(&self) -> SensorKind {
        self.sensor
    }

    async fn read(&mut self) -> Result<u16> {
        let text = read_attribute(self.sensor, &self.path).await?;

        text.parse().map_err(|e| Error::TransientRead {
            sensor: self.sensor,
            message: format!("invalid ADC count {text:?} in {:?}: {e}", self.path),
        })
    }
}

/// DHT22 behind the kernel `dht11` IIO driver, which reports milli-units.
#[derive(Debug, Clone)]
pub struct IioClimateSensor {
    temperature_path: PathBuf,
    humidity_path: PathBuf,
}

impl IioClimateSensor {
    pub fn new(device_dir: &Path) -> Self {
        Self {
            temperature_path: device_dir.join("in_temp_input"),
            humidity_path: device_dir.join("in_humidityrelative_input"),
        }
    }
}

impl RawSensorSource for IioClimateSensor {
    type Raw = ClimateRaw;

    fn sensor(&self) -> SensorKind {
        SensorKind::Dht22
    }

    async fn read(&mut self) -> Result<ClimateRaw> {
        let temperature = read_milli(&self.temperature_path).await?;
        let humidity = read_milli(&self.humidity_path).await?;

        Ok(ClimateRaw {
            temperature_celsius: temperature,
            humidity_percent: humidity,
        })
    }
}

async fn read_attribute(sensor: SensorKind, path: &Path) -> Result<String> {
    let text = fs::read_to_string(path)
        .await
        .map_err(|e| Error::TransientRead {
            sensor,
            message: format!("{path:?}: {e}"),
        })?;

    Ok(text.trim().to_string())
}

async fn read_milli(path: &Path) -> Result<f32> {
    let text = read_attribute(SensorKind::Dht22, path).await?;
    let milli: i32 = text.parse().map_err(|e| Error::TransientRead {
        sensor: SensorKind::Dht22,
        message: format!("invalid value {text:?} in {path:?}: {e}"),
    })?;

    Ok(milli as f32 / 1000.0)
}
