//! Error taxonomy of the acquisition pipeline.
//!
//! Every variant except [`Error::TimeNotSynchronized`] and [`Error::Config`]
//! is handled by the component that detects it and only ever surfaces as log
//! output. Sample rejections by the validation filter are reported through
//! [`crate::validation::Rejection`] instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::sensor::SensorKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {sensor}: {message}")]
    TransientRead { sensor: SensorKind, message: String },

    #[error("division singularity: sensor voltage {voltage} V is not positive")]
    DivisionSingularity { voltage: f32 },

    #[error("non-physical sensor resistance {resistance} ohm at {voltage} V")]
    NonPhysicalResistance { voltage: f32, resistance: f32 },

    #[error("calibration of {sensor} failed: {source}")]
    Calibration {
        sensor: SensorKind,
        #[source]
        source: Box<Error>,
    },

    #[error("calibration of {sensor} produced an invalid baseline: {baseline}")]
    InvalidBaseline { sensor: SensorKind, baseline: f32 },

    #[error("{sensor} does not support calibration")]
    CalibrationUnsupported { sensor: SensorKind },

    #[error("failed to write session file {path:?}: {source}")]
    PersistenceIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("row timestamp {timestamp} is not after the previous row {previous}")]
    NonMonotonicRow { timestamp: String, previous: String },

    #[error("failed to merge {path:?}: {source}")]
    MergeFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("system time is not synchronized")]
    TimeNotSynchronized,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: impl Into<io::Error>) -> Self {
        Error::PersistenceIo {
            path: path.into(),
            source: source.into(),
        }
    }

    pub(crate) fn merge(path: impl Into<PathBuf>, source: impl Into<io::Error>) -> Self {
        Error::MergeFile {
            path: path.into(),
            source: source.into(),
        }
    }
}
