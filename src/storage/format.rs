use std::path::{Path, PathBuf};

use chrono::DateTime;
use chrono_tz::Tz;

use crate::store::SharedSnapshot;

pub const CSV_HEADER: [&str; 7] = [
    "Timestamp",
    "Temperature(C)",
    "Humidity(%)",
    "MQ4_Voltage(V)",
    "MQ4_PPM",
    "MQ7_Voltage(V)",
    "MQ7_CO_PPM",
];

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const SESSION_FILE_FORMAT: &str = "data_%Y_%m_%d_%H_%M_%S.csv";

pub const MERGED_FILE_NAME: &str = "merged.csv";

pub fn session_file_name(start: &DateTime<Tz>) -> String {
    start.format(SESSION_FILE_FORMAT).to_string()
}

/// Fixed location of the merged log served for download.
pub fn merged_log_path(storage_dir: &Path) -> PathBuf {
    storage_dir.join(MERGED_FILE_NAME)
}

pub fn format_row(at: &DateTime<Tz>, snapshot: &SharedSnapshot) -> [String; 7] {
    [
        at.format(TIMESTAMP_FORMAT).to_string(),
        format!("{:.1}", snapshot.temperature),
        format!("{:.1}", snapshot.humidity),
        format!("{:.2}", snapshot.mq4_voltage),
        format!("{:.2}", snapshot.mq4_ppm),
        format!("{:.2}", snapshot.mq7_voltage),
        format!("{:.2}", snapshot.mq7_ppm),
    ]
}

pub(crate) fn is_header(first_field: &str) -> bool {
    first_field == CSV_HEADER[0]
}
