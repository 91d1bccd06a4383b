//! Timed end of a logging run.
//!
//! The supervisor waits for the configured run duration, stops the session
//! writer, consolidates all session segments and then reports the halt. The
//! lifecycle only moves forward: `Running → Merging → Halted`. Restarting is
//! a new process.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::storage::{MergedLog, merge_session_files};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SupervisorState {
    Running,
    Merging,
    Halted,
}

#[derive(Debug)]
pub struct SessionSupervisor {
    run_duration: Duration,
    storage_dir: PathBuf,
    state: watch::Sender<SupervisorState>,
    writer: Option<JoinHandle<()>>,
}

impl SessionSupervisor {
    pub fn new(run_duration: Duration, storage_dir: PathBuf) -> Self {
        let (state, _) = watch::channel(SupervisorState::Running);

        Self {
            run_duration,
            storage_dir,
            state,
            writer: None,
        }
    }

    /// Hands over the session writer task. It is stopped before merging so
    /// the current segment is complete when it is read.
    pub fn with_writer(mut self, writer: JoinHandle<()>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Observes lifecycle transitions, e.g. to stop accepting downloads
    /// while merging.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Sleeps for the run duration, merges, and returns once halted.
    ///
    /// Merge problems are logged; they never prevent the halt.
    pub async fn run(mut self) -> Option<MergedLog> {
        info!(run_duration = ?self.run_duration, "supervisor started, waiting before shutdown");
        tokio::time::sleep(self.run_duration).await;

        self.advance(SupervisorState::Merging);
        if let Some(writer) = self.writer.take() {
            writer.abort();
            match writer.await {
                Err(err) if !err.is_cancelled() => error!("session writer failed: {err}"),
                _ => info!("session writer stopped"),
            }
        }

        info!(dir = ?self.storage_dir, "merging session files");

        let storage_dir = self.storage_dir.clone();
        let merged = match tokio::task::spawn_blocking(move || merge_session_files(&storage_dir)).await {
            Ok(Ok(merged)) => Some(merged),
            Ok(Err(err)) => {
                error!("merge failed: {err}");
                None
            }
            Err(err) => {
                error!("merge task failed: {err}");
                None
            }
        };

        self.advance(SupervisorState::Halted);
        warn!("supervisor completed, halting");

        merged
    }

    fn advance(&self, next: SupervisorState) {
        self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
    }
}
