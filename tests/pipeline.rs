use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use air_logger::{
    acquisition::{AcquisitionScheduler, ClimateTransducer, SensorStream},
    calibration::GasSensor,
    clock::{Clock, ManualClock},
    config::{Config, GasProfile},
    sensor::SensorKind,
    source::{IioAdcChannel, IioClimateSensor},
    storage::{CSV_HEADER, PersistenceSession, merge_session_files},
    store::SharedStateStore,
    supervisor::{SessionSupervisor, SupervisorState},
    validation::ValidationFilter,
};
use chrono::{TimeDelta, TimeZone as _};
use chrono_tz::Tz;

fn start_clock() -> ManualClock {
    ManualClock::new(
        Tz::America__Sao_Paulo
            .with_ymd_and_hms(2025, 8, 15, 14, 0, 0)
            .unwrap(),
    )
}

fn write_iio(dir: &Path, attribute: &str, value: &str) {
    fs::write(dir.join(attribute), value).unwrap();
}

/// Moves `clock` forward in step with the paused tokio clock.
fn drive(clock: &ManualClock) -> tokio::task::JoinHandle<()> {
    let clock = clock.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            clock.advance(TimeDelta::seconds(1));
        }
    })
}

#[tokio::test(start_paused = true)]
async fn run_logs_validated_readings_and_merges_on_expiry() {
    let storage = tempfile::tempdir().unwrap();
    let adc = tempfile::tempdir().unwrap();
    let dht = tempfile::tempdir().unwrap();
    write_iio(adc.path(), "in_voltage6_raw", "2048\n");
    write_iio(adc.path(), "in_voltage7_raw", "1200\n");
    write_iio(dht.path(), "in_temp_input", "21300\n");
    write_iio(dht.path(), "in_humidityrelative_input", "64000\n");

    let config = Config::default();
    let clock = start_clock();
    let ticking = drive(&clock);
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let store = SharedStateStore::new();

    let session = PersistenceSession::create(storage.path(), &clock).unwrap();
    let writer = tokio::spawn(session.run(
        store.clone(),
        shared_clock.clone(),
        config.writer_interval,
    ));

    let mut scheduler = AcquisitionScheduler::new(shared_clock, store.clone());
    let climate = &config.sensors.dht22;
    scheduler.spawn(
        SensorStream::new(
            IioClimateSensor::new(dht.path()),
            ClimateTransducer,
            ValidationFilter::new(SensorKind::Dht22, climate.limits(), climate.smoothing_window),
            climate.poll_interval,
        )
        .unwrap(),
    );
    for (kind, profile) in [
        (SensorKind::Mq4, &config.sensors.mq4),
        (SensorKind::Mq7, &config.sensors.mq7),
    ] {
        scheduler.spawn(
            SensorStream::new(
                IioAdcChannel::new(kind, adc.path(), profile.channel),
                GasSensor::new(kind, profile),
                ValidationFilter::new(kind, profile.limits(), profile.smoothing_window),
                profile.poll_interval,
            )
            .unwrap(),
        );
    }

    let supervisor = SessionSupervisor::new(Duration::from_secs(65), storage.path().to_path_buf())
        .with_writer(writer);
    let state = supervisor.subscribe();
    let merged = supervisor.run().await.unwrap();
    ticking.abort();
    drop(scheduler);

    assert_eq!(*state.borrow(), SupervisorState::Halted);
    assert_eq!(merged.source_segments.len(), 1);
    // The segment was complete when merged: nothing was appended after.
    let segment = fs::read_to_string(&merged.source_segments[0]).unwrap();
    assert_eq!(segment.lines().count() as u64 - 1, merged.row_count);

    let text = fs::read_to_string(storage.path().join("merged.csv")).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some(CSV_HEADER.join(",").as_str()));
    let rows: Vec<_> = lines.collect();
    assert_eq!(rows.len() as u64, merged.row_count);
    assert!(rows.len() >= 6, "only {} rows", rows.len());

    // Both gas sensors calibrate on their first sample, so a steady input
    // reads as clean air.
    let last: Vec<_> = rows.last().unwrap().split(',').collect();
    assert_eq!(last[1], "21.3");
    assert_eq!(last[2], "64.0");
    assert_eq!(last[3], "1.65");
    let mq4_ppm: f32 = last[4].parse().unwrap();
    let mq7_ppm: f32 = last[6].parse().unwrap();
    assert!((mq4_ppm - 625.0 * 9.83f32.powf(-2.1)).abs() < 0.011);
    assert!((mq7_ppm - 99.042 * 27.5f32.powf(-1.518)).abs() < 0.011);
}

#[tokio::test(start_paused = true)]
async fn unreadable_sensor_does_not_stop_other_streams() {
    let adc = tempfile::tempdir().unwrap();
    // Only the MQ-7 channel exists.
    write_iio(adc.path(), "in_voltage7_raw", "1200\n");

    let clock = start_clock();
    let ticking = drive(&clock);
    let store = SharedStateStore::new();
    let mut scheduler = AcquisitionScheduler::new(Arc::new(clock.clone()), store.clone());

    for (kind, profile) in [
        (SensorKind::Mq4, GasProfile::mq4()),
        (SensorKind::Mq7, GasProfile::mq7()),
    ] {
        scheduler.spawn(
            SensorStream::new(
                IioAdcChannel::new(kind, adc.path(), profile.channel),
                GasSensor::new(kind, &profile),
                ValidationFilter::new(kind, profile.limits(), profile.smoothing_window),
                profile.poll_interval,
            )
            .unwrap(),
        );
    }

    tokio::time::sleep(Duration::from_secs(15)).await;
    let snapshot = store.get_snapshot();
    assert_eq!(snapshot.mq4_voltage, 0.0);
    assert!(snapshot.mq7_voltage > 0.0);

    // The missing channel appears; the next tick picks it up.
    write_iio(adc.path(), "in_voltage6_raw", "1800\n");
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(store.get_snapshot().mq4_voltage > 0.0);

    ticking.abort();
    drop(scheduler);
}

#[test]
fn merging_sessions_keeps_every_row_in_order() {
    let storage = tempfile::tempdir().unwrap();
    let clock = start_clock();
    let store = SharedStateStore::new();
    let row_counts = [3u64, 0, 5];

    for rows in row_counts {
        let mut session = PersistenceSession::create(storage.path(), &clock).unwrap();
        for _ in 0..rows {
            clock.advance(TimeDelta::seconds(10));
            session.append(clock.now(), &store.get_snapshot()).unwrap();
        }
        assert_eq!(session.file().row_count, rows);
        clock.advance(TimeDelta::minutes(30));
    }

    let merged = merge_session_files(storage.path()).unwrap();

    assert_eq!(merged.source_segments.len(), row_counts.len());
    assert_eq!(merged.row_count, row_counts.iter().sum::<u64>());

    let text = fs::read_to_string(merged.output_path.unwrap()).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.iter().filter(|l| l.starts_with("Timestamp")).count(), 1);
    assert_eq!(lines.len() as u64, 1 + row_counts.iter().sum::<u64>());

    let mut timestamps: Vec<_> = lines[1..].iter().map(|l| &l[..19]).collect();
    let in_file_order = timestamps.clone();
    timestamps.sort();
    assert_eq!(timestamps, in_file_order);
}

#[test]
fn merge_with_no_sessions_leaves_no_output() {
    let storage = tempfile::tempdir().unwrap();

    let merged = merge_session_files(storage.path()).unwrap();

    assert!(merged.output_path.is_none());
    assert!(!storage.path().join("merged.csv").exists());
}
