pub mod acquisition;
pub mod calibration;
pub mod clock;
pub mod config;
pub mod conversion;
pub mod error;
pub mod logging;
pub mod sensor;
pub mod source;
pub mod storage;
pub mod store;
pub mod supervisor;
pub mod validation;
