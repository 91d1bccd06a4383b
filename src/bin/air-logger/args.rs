use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use clap::Parser;

#[derive(Debug, Parser)]
pub struct Args {
    #[arg(long, env = "AIR_LOGGER_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "AIR_LOGGER_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    #[arg(long, env = "TZ")]
    pub timezone: Option<Tz>,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub run_duration: Option<Duration>,

    #[arg(long, env = "AIR_LOGGER_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[arg(long, default_value = "compact")]
    pub log_format: String,
}
