use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Timelike as _};
use chrono_tz::Tz;
use csv::{Writer, WriterBuilder};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::storage::{CSV_HEADER, TIMESTAMP_FORMAT, format_row, session_file_name};
use crate::store::{SharedSnapshot, SharedStateStore};

/// The CSV segment written by this process run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFile {
    pub path: PathBuf,

    pub start_time: DateTime<Tz>,

    pub row_count: u64,
}

/// Single writer of one session segment.
#[derive(Debug)]
pub struct PersistenceSession {
    file: SessionFile,
    writer: Writer<File>,
    last_row_at: Option<DateTime<Tz>>,
}

impl PersistenceSession {
    /// Creates the segment for a run starting now and writes its header.
    ///
    /// Fails with [`Error::TimeNotSynchronized`] if the clock is not set.
    pub fn create<C: Clock + ?Sized>(storage_dir: &Path, clock: &C) -> Result<Self> {
        if !clock.is_synchronized() {
            return Err(Error::TimeNotSynchronized);
        }

        let start_time = clock.now();
        let path = storage_dir.join(session_file_name(&start_time));
        info!(?path, "initializing session file");

        if path.exists() {
            warn!(?path, "session file already exists, overwriting");
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::persistence(&path, e))?;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        writer
            .write_record(CSV_HEADER)
            .and_then(|()| writer.flush().map_err(csv::Error::from))
            .map_err(|e| Error::persistence(&path, e))?;

        Ok(Self {
            file: SessionFile {
                path,
                start_time,
                row_count: 0,
            },
            writer,
            last_row_at: None,
        })
    }

    pub fn file(&self) -> &SessionFile {
        &self.file
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    /// Appends one row and flushes it to disk.
    ///
    /// Rows must be strictly later than the previous row at second
    /// resolution; an earlier or equal timestamp is refused. The comparison
    /// is on local wall time, as printed, so the repeated hour after a
    /// daylight saving fall-back is skipped rather than written out of order.
    pub fn append(&mut self, at: DateTime<Tz>, snapshot: &SharedSnapshot) -> Result<()> {
        let row = format_row(&at, snapshot);

        if let Some(previous) = self.last_row_at
            && wall_second(&at) <= wall_second(&previous)
        {
            return Err(Error::NonMonotonicRow {
                timestamp: row[0].clone(),
                previous: previous.format(TIMESTAMP_FORMAT).to_string(),
            });
        }

        self.writer
            .write_record(&row)
            .and_then(|()| self.writer.flush().map_err(csv::Error::from))
            .map_err(|e| Error::persistence(&self.file.path, e))?;

        self.last_row_at = Some(at);
        self.file.row_count += 1;
        debug!(path = ?self.file.path, row = %row.join(","), "row appended");

        Ok(())
    }

    /// Snapshots `store` every `every` and appends a row, forever.
    ///
    /// Failed appends are logged and skipped.
    pub async fn run(mut self, store: SharedStateStore, clock: Arc<dyn Clock>, every: Duration) {
        info!(path = ?self.file.path, interval = ?every, "session writer started");

        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let snapshot = store.get_snapshot();
            match self.append(clock.now(), &snapshot) {
                Ok(()) => info!(
                    temperature = snapshot.temperature,
                    humidity = snapshot.humidity,
                    mq4_voltage = snapshot.mq4_voltage,
                    mq4_ppm = snapshot.mq4_ppm,
                    mq7_voltage = snapshot.mq7_voltage,
                    mq7_ppm = snapshot.mq7_ppm,
                    "sensor data recorded"
                ),
                Err(err) => warn!("{err}; skipping row"),
            }
        }
    }
}

fn wall_second(at: &DateTime<Tz>) -> NaiveDateTime {
    at.naive_local().with_nanosecond(0).unwrap_or(at.naive_local())
}
