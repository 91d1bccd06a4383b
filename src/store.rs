//! Latest accepted value of every sensor stream.
//!
//! One mutex guards the whole snapshot. A writer replaces its own field group
//! in a single critical section, so a reader never sees half of an update.
//! Groups of different sensors may come from different poll cycles.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::DateTime;
use chrono_tz::Tz;

use crate::sensor::SensorGroup;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SharedSnapshot {
    pub temperature: f32,
    pub humidity: f32,
    pub mq4_voltage: f32,
    pub mq4_ppm: f32,
    pub mq7_voltage: f32,
    pub mq7_ppm: f32,
    pub last_updated: Option<DateTime<Tz>>,
}

/// Cloneable handle to the shared snapshot.
#[derive(Debug, Clone, Default)]
pub struct SharedStateStore {
    inner: Arc<Mutex<SharedSnapshot>>,
}

impl SharedStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites both fields of `group` under the lock.
    pub fn set(&self, group: SensorGroup, first: f32, second: f32, at: DateTime<Tz>) {
        let mut snapshot = self.lock();
        match group {
            SensorGroup::Climate => {
                snapshot.temperature = first;
                snapshot.humidity = second;
            }
            SensorGroup::Methane => {
                snapshot.mq4_voltage = first;
                snapshot.mq4_ppm = second;
            }
            SensorGroup::CarbonMonoxide => {
                snapshot.mq7_voltage = first;
                snapshot.mq7_ppm = second;
            }
        }
        snapshot.last_updated = Some(at);
    }

    pub fn get_snapshot(&self) -> SharedSnapshot {
        *self.lock()
    }

    // Plain floats cannot be left half-written by a panicking holder.
    fn lock(&self) -> MutexGuard<'_, SharedSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use chrono::TimeZone as _;

    use super::*;

    fn at(second: u32) -> DateTime<Tz> {
        Tz::UTC.with_ymd_and_hms(2025, 6, 1, 12, 0, second).unwrap()
    }

    #[test]
    fn starts_zeroed() {
        let store = SharedStateStore::new();

        assert_eq!(store.get_snapshot(), SharedSnapshot::default());
    }

    #[test]
    fn updates_only_the_given_group() {
        let store = SharedStateStore::new();

        store.set(SensorGroup::Climate, 21.5, 48.0, at(1));
        store.set(SensorGroup::CarbonMonoxide, 0.8, 12.5, at(2));

        let snapshot = store.get_snapshot();
        assert_eq!(snapshot.temperature, 21.5);
        assert_eq!(snapshot.humidity, 48.0);
        assert_eq!(snapshot.mq4_voltage, 0.0);
        assert_eq!(snapshot.mq4_ppm, 0.0);
        assert_eq!(snapshot.mq7_voltage, 0.8);
        assert_eq!(snapshot.mq7_ppm, 12.5);
        assert_eq!(snapshot.last_updated, Some(at(2)));
    }

    #[test]
    fn snapshot_without_intervening_set_is_identical() {
        let store = SharedStateStore::new();
        store.set(SensorGroup::Methane, 1.2, 300.0, at(3));

        assert_eq!(store.get_snapshot(), store.get_snapshot());
    }

    #[test]
    fn clones_share_state() {
        let store = SharedStateStore::new();
        let writer = store.clone();

        writer.set(SensorGroup::Methane, 1.0, 2.0, at(4));

        assert_eq!(store.get_snapshot().mq4_ppm, 2.0);
    }

    #[test]
    fn concurrent_writers_never_tear_a_group() {
        let store = SharedStateStore::new();

        // Each writer keeps `second == first * 10` so a torn group shows up
        // as a pair breaking that relation.
        let writers: Vec<_> = [SensorGroup::Methane, SensorGroup::CarbonMonoxide]
            .into_iter()
            .map(|group| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..20_000u32 {
                        let v = i as f32;
                        store.set(group, v, v * 10.0, at(i % 60));
                    }
                })
            })
            .collect();

        let reader = {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..20_000 {
                    let s = store.get_snapshot();
                    assert_eq!(s.mq4_ppm, s.mq4_voltage * 10.0);
                    assert_eq!(s.mq7_ppm, s.mq7_voltage * 10.0);
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();
    }
}
