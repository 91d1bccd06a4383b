//! Wall-clock access and the time synchronisation gate.
//!
//! Session filenames and row timestamps embed local wall-clock time, so
//! nothing is started before the clock is known to be set.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Datelike as _, TimeDelta, Utc};
use chrono_tz::Tz;
use tracing::{error, info};

use crate::error::{Error, Result};

/// Years before this mean the clock was never set.
pub const MIN_SYNCHRONIZED_YEAR: i32 = 2020;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Tz>;

    fn is_synchronized(&self) -> bool {
        self.now().year() >= MIN_SYNCHRONIZED_YEAR
    }
}

/// System time rendered in a fixed time zone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    timezone: Tz,
}

impl SystemClock {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.timezone)
    }
}

/// Clock that only moves when told to. Used for replays and tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Tz>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Tz>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Tz>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Tz> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Polls `clock` until it reports a synchronised time.
///
/// Gives up after `attempts` checks spaced `delay` apart.
pub async fn wait_for_sync<C: Clock + ?Sized>(
    clock: &C,
    attempts: u32,
    delay: Duration,
) -> Result<DateTime<Tz>> {
    for attempt in 1..=attempts {
        if clock.is_synchronized() {
            let now = clock.now();
            info!(%now, "system time synchronized");
            return Ok(now);
        }

        if attempt < attempts {
            info!(attempt, attempts, "waiting for system time to be set");
            tokio::time::sleep(delay).await;
        }
    }

    error!(attempts, "failed to synchronize system time");
    Err(Error::TimeNotSynchronized)
}
