//! Background lifecycle of the ingestion pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::email::{EmailError, SearchMode};
use crate::error::{IntakeError, Result};
use crate::shutdown::{self, Shutdown, ShutdownTrigger};

use super::pipeline::{CycleReport, Pipeline};

/// Lifecycle state. Only ever changed while holding the processor's lock.
enum Lifecycle {
    Stopped,
    Running {
        trigger: ShutdownTrigger,
        poll: JoinHandle<()>,
        backfill: Option<JoinHandle<()>>,
    },
}

/// Drives the pipeline on a timer from a single background task.
///
/// Cycles run one after another inside that task, so they never overlap.
/// With `fetchExisting` set, `start` also launches a detached, time-bounded
/// backfill sweep.
pub struct IngestionProcessor {
    pipeline: Arc<Pipeline>,
    poll_interval: Duration,
    backfill: Option<Duration>,
    state: Mutex<Lifecycle>,
}

impl IngestionProcessor {
    pub fn new(config: &Config, pipeline: Arc<Pipeline>) -> Self {
        if config.mailbox.delete_after_read {
            warn!("deleteAfterRead is set but has no effect; messages are never deleted");
        }
        Self {
            pipeline,
            poll_interval: config.processing.poll_interval(),
            backfill: config
                .mailbox
                .fetch_existing
                .then(|| config.processing.backfill_timeout()),
            state: Mutex::new(Lifecycle::Stopped),
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Starts the poll loop. Fails with [`IntakeError::AlreadyRunning`] if
    /// it is already running.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, Lifecycle::Running { .. }) {
            return Err(IntakeError::AlreadyRunning);
        }

        let (trigger, shutdown) = shutdown::channel();

        let backfill = self.backfill.map(|timeout| {
            let pipeline = Arc::clone(&self.pipeline);
            let shutdown = shutdown.clone();
            tokio::spawn(
                run_backfill(pipeline, timeout, shutdown).instrument(info_span!("backfill")),
            )
        });

        let pipeline = Arc::clone(&self.pipeline);
        let poll = tokio::spawn(poll_loop(pipeline, self.poll_interval, shutdown));

        info!(
            interval_secs = self.poll_interval.as_secs(),
            backfill = backfill.is_some(),
            "ingestion processor started"
        );
        *state = Lifecycle::Running {
            trigger,
            poll,
            backfill,
        };
        Ok(())
    }

    /// Signals shutdown and waits for the background tasks to finish.
    /// Stopping a stopped processor is a no-op.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Lifecycle::Running {
            trigger,
            poll,
            backfill,
        } = std::mem::replace(&mut *state, Lifecycle::Stopped)
        else {
            return;
        };

        trigger.trigger();
        if let Err(e) = poll.await {
            error!(error = %e, "poll task ended abnormally");
        }
        if let Some(backfill) = backfill {
            if let Err(e) = backfill.await {
                error!(error = %e, "backfill task ended abnormally");
            }
        }
        info!("ingestion processor stopped");
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, Lifecycle::Running { .. })
    }

    /// Runs a single cycle in the foreground, outside the poll loop.
    pub async fn run_once(
        &self,
        mode: SearchMode,
        shutdown: &Shutdown,
    ) -> std::result::Result<CycleReport, EmailError> {
        self.pipeline.poll_cycle(mode, shutdown).await
    }
}

async fn poll_loop(pipeline: Arc<Pipeline>, interval: Duration, mut shutdown: Shutdown) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.triggered() => break,
        }
        if shutdown.is_triggered() {
            break;
        }

        match pipeline.poll_cycle(SearchMode::Incremental, &shutdown).await {
            Ok(_) => {}
            Err(EmailError::Cancelled) => break,
            Err(e) => error!(error = %e, "poll cycle aborted"),
        }
    }
    info!("poll loop exited");
}

async fn run_backfill(pipeline: Arc<Pipeline>, timeout: Duration, shutdown: Shutdown) {
    info!(timeout_secs = timeout.as_secs(), "backfill started");
    match tokio::time::timeout(timeout, pipeline.poll_cycle(SearchMode::Backfill, &shutdown)).await
    {
        Ok(Ok(report)) => info!(
            candidates = report.candidates,
            processed = report.processed,
            duplicates = report.duplicates,
            "backfill finished"
        ),
        Ok(Err(EmailError::Cancelled)) => info!("backfill cancelled by shutdown"),
        Ok(Err(e)) => error!(error = %e, "backfill failed"),
        Err(_) => warn!(timeout_secs = timeout.as_secs(), "backfill timed out"),
    }
}
