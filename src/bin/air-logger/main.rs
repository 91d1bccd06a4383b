mod args;

use std::process::ExitCode;
use std::sync::Arc;

use air_logger::{
    acquisition::{AcquisitionScheduler, ClimateTransducer, Recalibrator, SensorStream},
    calibration::GasSensor,
    clock::{Clock, SystemClock, wait_for_sync},
    config::Config,
    logging::{self, LogFormat},
    sensor::SensorKind,
    source::{IioAdcChannel, IioClimateSensor},
    storage::PersistenceSession,
    store::SharedStateStore,
    supervisor::SessionSupervisor,
    validation::ValidationFilter,
};
use anyhow::{Context as _, Result};
use args::Args;
use clap::Parser as _;
use tokio::process::Command;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = run().await {
        error!("{e:#}");
        eprintln!("{e:#}");
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args).context("failed to load configuration")?;

    let log_format: LogFormat = args.log_format.parse().context("invalid --log-format")?;
    logging::init(&config.log_level, log_format).context("failed to initialize logging")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.timezone));
    wait_for_sync(
        clock.as_ref(),
        config.time_sync.attempts,
        config.time_sync.retry_delay,
    )
    .await
    .context("system time not synchronized, aborting startup")?;

    std::fs::create_dir_all(&config.storage_dir)
        .with_context(|| format!("failed to create storage directory: {:?}", config.storage_dir))?;

    let store = SharedStateStore::new();

    let session = PersistenceSession::create(&config.storage_dir, clock.as_ref())
        .context("failed to initialize session file")?;
    let writer = tokio::spawn(session.run(store.clone(), clock.clone(), config.writer_interval));

    let mut scheduler = AcquisitionScheduler::new(clock.clone(), store.clone());
    spawn_streams(&mut scheduler, &config).context("failed to start acquisition")?;
    listen_for_recalibration(scheduler.recalibrator());

    let supervisor = SessionSupervisor::new(config.run_duration, config.storage_dir.clone())
        .with_writer(writer);
    info!(streams = scheduler.len(), "application started");

    let merged = supervisor.run().await;
    if let Some(merged) = merged {
        info!(rows = merged.row_count, files = merged.source_segments.len(), "run complete");
    }

    drop(scheduler);

    if let Some(command) = &config.halt_command {
        run_halt_command(command).await;
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;

    if let Some(storage_dir) = &args.storage_dir {
        config.storage_dir = storage_dir.clone();
    }
    if let Some(timezone) = args.timezone {
        config.timezone = timezone;
    }
    if let Some(run_duration) = args.run_duration {
        config.run_duration = run_duration;
    }
    if let Some(log_level) = &args.log_level {
        config.log_level = log_level.clone();
    }

    config.validate()?;

    Ok(config)
}

fn spawn_streams(scheduler: &mut AcquisitionScheduler, config: &Config) -> Result<()> {
    let climate = &config.sensors.dht22;
    scheduler.spawn(SensorStream::new(
        IioClimateSensor::new(&climate.iio_device),
        ClimateTransducer,
        ValidationFilter::new(SensorKind::Dht22, climate.limits(), climate.smoothing_window),
        climate.poll_interval,
    )?);

    for (kind, profile) in [
        (SensorKind::Mq4, &config.sensors.mq4),
        (SensorKind::Mq7, &config.sensors.mq7),
    ] {
        let source = IioAdcChannel::new(kind, &profile.iio_device, profile.channel);
        info!(sensor = %kind, path = ?source.path(), "configured ADC channel");

        scheduler.spawn(SensorStream::new(
            source,
            GasSensor::new(kind, profile),
            ValidationFilter::new(kind, profile.limits(), profile.smoothing_window),
            profile.poll_interval,
        )?);
    }

    Ok(())
}

#[cfg(unix)]
fn listen_for_recalibration(recalibrator: Recalibrator) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut signals = match signal(SignalKind::user_defined1()) {
        Ok(signals) => signals,
        Err(e) => {
            warn!("failed to install SIGUSR1 handler, on-demand recalibration disabled: {e}");
            return;
        }
    };

    tokio::spawn(async move {
        while signals.recv().await.is_some() {
            let requested = recalibrator.request(None);
            info!(requested, "SIGUSR1 received, recalibrating gas sensors");
        }
    });
}

#[cfg(not(unix))]
fn listen_for_recalibration(_recalibrator: Recalibrator) {}

async fn run_halt_command(command: &[String]) {
    let Some((program, args)) = command.split_first() else {
        return;
    };

    info!(?command, "running halt command");
    match Command::new(program).args(args).status().await {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(?command, %status, "halt command failed"),
        Err(e) => warn!(?command, "failed to run halt command: {e}"),
    }
}
