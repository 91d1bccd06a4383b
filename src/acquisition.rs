//! Per-sensor periodic acquisition loops.
//!
//! Every stream runs in its own task with its own cadence:
//! read → convert → validate → publish. A failed read or a rejected sample
//! produces nothing for that cycle and the next tick starts fresh. Reads are
//! retried forever at the fixed cadence; there is no backoff.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::calibration::GasSensor;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::sensor::{ClimateRaw, SensorKind, SensorReading};
use crate::source::RawSensorSource;
use crate::store::SharedStateStore;
use crate::validation::{Rejection, ValidatedMeasurement, ValidationFilter};

/// Turns a raw reading into the two quantities of a sensor.
pub trait Transducer: Send + 'static {
    type Raw: Copy + Send + Debug + 'static;

    fn sensor(&self) -> SensorKind;

    fn convert(&self, reading: &SensorReading<Self::Raw>) -> Result<[f32; 2]>;

    fn supports_calibration(&self) -> bool {
        false
    }

    /// Takes `reading` as a reference sample. Returns the new baseline.
    fn calibrate(&mut self, _reading: &SensorReading<Self::Raw>) -> Result<f32> {
        Err(Error::CalibrationUnsupported {
            sensor: self.sensor(),
        })
    }
}

impl Transducer for GasSensor {
    type Raw = u16;

    fn sensor(&self) -> SensorKind {
        self.kind()
    }

    fn convert(&self, reading: &SensorReading<u16>) -> Result<[f32; 2]> {
        let c = GasSensor::convert(self, reading.raw)?;
        debug!(
            sensor = %reading.sensor,
            raw = reading.raw,
            voltage = c.voltage,
            rs = c.resistance,
            ppm = c.ppm,
            "converted"
        );
        Ok([c.voltage, c.ppm])
    }

    fn supports_calibration(&self) -> bool {
        true
    }

    fn calibrate(&mut self, reading: &SensorReading<u16>) -> Result<f32> {
        GasSensor::calibrate(self, reading.raw, reading.measured_at)
    }
}

/// The DHT22 already reports physical units.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClimateTransducer;

impl Transducer for ClimateTransducer {
    type Raw = ClimateRaw;

    fn sensor(&self) -> SensorKind {
        SensorKind::Dht22
    }

    fn convert(&self, reading: &SensorReading<ClimateRaw>) -> Result<[f32; 2]> {
        Ok([reading.raw.temperature_celsius, reading.raw.humidity_percent])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Published([f32; 2]),
    Rejected(Rejection),
    ReadFailed,
}

/// One sensor's source, conversion and filter, driven at a fixed cadence.
#[derive(Debug)]
pub struct SensorStream<S, T> {
    source: S,
    transducer: T,
    filter: ValidationFilter,
    interval: Duration,
}

impl<S, T> SensorStream<S, T>
where
    S: RawSensorSource,
    T: Transducer<Raw = S::Raw>,
{
    pub fn new(source: S, transducer: T, filter: ValidationFilter, interval: Duration) -> Result<Self> {
        if source.sensor() != transducer.sensor() {
            return Err(Error::Config(format!(
                "source for {} paired with a {} transducer",
                source.sensor(),
                transducer.sensor()
            )));
        }
        if interval.is_zero() {
            return Err(Error::Config(format!(
                "{}: poll interval must be positive",
                source.sensor()
            )));
        }

        Ok(Self {
            source,
            transducer,
            filter,
            interval,
        })
    }

    pub fn sensor(&self) -> SensorKind {
        self.transducer.sensor()
    }

    pub fn transducer(&self) -> &T {
        &self.transducer
    }

    pub fn filter(&self) -> &ValidationFilter {
        &self.filter
    }

    /// Runs one read → convert → validate → publish cycle.
    pub async fn poll_once<C>(&mut self, clock: &C, store: &SharedStateStore) -> CycleOutcome
    where
        C: Clock + ?Sized,
    {
        let sensor = self.sensor();

        let reading = match self.read(clock).await {
            Ok(reading) => reading,
            Err(err) => {
                warn!(sensor = %sensor, "{err}; retrying next cycle");
                return CycleOutcome::ReadFailed;
            }
        };

        let measurement = match self.transducer.convert(&reading) {
            Ok(values) => self.filter.process(values),
            Err(err) => ValidatedMeasurement::rejected(
                sensor,
                [f32::NAN; 2],
                Rejection::Conversion(err.to_string()),
            ),
        };

        if let Some(reason) = measurement.reason {
            warn!(sensor = %sensor, raw = ?reading.raw, "sample rejected: {reason}");
            return CycleOutcome::Rejected(reason);
        }

        let [first, second] = measurement.values;
        info!(sensor = %sensor, raw = ?reading.raw, first, second, "published");
        store.set(sensor.group(), first, second, reading.measured_at);

        CycleOutcome::Published(measurement.values)
    }

    /// Takes one sample as clean-air reference. Keeps the old baseline on
    /// any failure.
    ///
    /// A new baseline restarts the filter, so the next sample is accepted
    /// without a rate check against values converted with the old one.
    pub async fn calibrate<C>(&mut self, clock: &C) -> Result<f32>
    where
        C: Clock + ?Sized,
    {
        let sensor = self.sensor();
        if !self.transducer.supports_calibration() {
            return Err(Error::CalibrationUnsupported { sensor });
        }

        let reading = self.read(clock).await.map_err(|source| {
            let err = Error::Calibration {
                sensor,
                source: Box::new(source),
            };
            warn!(sensor = %sensor, "{err}; keeping current baseline");
            err
        })?;

        let baseline = self.transducer.calibrate(&reading).inspect_err(|err| {
            warn!(sensor = %sensor, "{err}; keeping current baseline");
        })?;
        self.filter.reset();

        Ok(baseline)
    }

    async fn read<C>(&mut self, clock: &C) -> Result<SensorReading<S::Raw>>
    where
        C: Clock + ?Sized,
    {
        let raw = self.source.read().await?;

        Ok(SensorReading {
            sensor: self.source.sensor(),
            raw,
            measured_at: clock.now(),
        })
    }

    /// Calibrates once if supported, then polls forever.
    ///
    /// A message on `recalibrate` triggers an on-demand calibration between
    /// two cycles.
    pub async fn run(
        mut self,
        clock: Arc<dyn Clock>,
        store: SharedStateStore,
        mut recalibrate: mpsc::Receiver<()>,
    ) {
        let sensor = self.sensor();

        if self.transducer.supports_calibration() {
            let _ = self.calibrate(clock.as_ref()).await;
        }

        info!(sensor = %sensor, interval = ?self.interval, "acquisition started");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once(clock.as_ref(), &store).await;
                }
                Some(()) = recalibrate.recv() => {
                    info!(sensor = %sensor, "recalibration requested");
                    let _ = self.calibrate(clock.as_ref()).await;
                }
            }
        }
    }
}

/// Handle for requesting on-demand recalibration of gas sensors.
#[derive(Debug, Clone, Default)]
pub struct Recalibrator {
    senders: Vec<(SensorKind, mpsc::Sender<()>)>,
}

impl Recalibrator {
    /// Requests recalibration of `sensor`, or of every calibratable sensor.
    ///
    /// Returns the number of streams that accepted the request. A request
    /// that is already pending is not queued twice.
    pub fn request(&self, sensor: Option<SensorKind>) -> usize {
        self.senders
            .iter()
            .filter(|(kind, _)| sensor.is_none_or(|s| s == *kind))
            .filter(|(_, tx)| tx.try_send(()).is_ok())
            .count()
    }
}

/// Owns the acquisition tasks. Dropping it aborts them.
pub struct AcquisitionScheduler {
    clock: Arc<dyn Clock>,
    store: SharedStateStore,
    tasks: JoinSet<()>,
    recalibrator: Recalibrator,
}

impl AcquisitionScheduler {
    pub fn new(clock: Arc<dyn Clock>, store: SharedStateStore) -> Self {
        Self {
            clock,
            store,
            tasks: JoinSet::new(),
            recalibrator: Recalibrator::default(),
        }
    }

    pub fn spawn<S, T>(&mut self, stream: SensorStream<S, T>)
    where
        S: RawSensorSource,
        T: Transducer<Raw = S::Raw>,
    {
        let (tx, rx) = mpsc::channel(1);
        if stream.transducer.supports_calibration() {
            self.recalibrator.senders.push((stream.sensor(), tx));
        }

        self.tasks
            .spawn(stream.run(self.clock.clone(), self.store.clone(), rx));
    }

    pub fn recalibrator(&self) -> Recalibrator {
        self.recalibrator.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
