//! The backup loop.
//!
//! One task owns the scheduler and drives it one state at a time, so a run
//! can never overlap another. Every stage failure is handled the same way:
//! log, flip health to failed, back off briefly, start a fresh run.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backup_core::{
    error_chain, BackupRun, Clock, HealthReporter, InvalidTransition, RunEvent, RunState, Stage,
    StageError,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BackupConfig;
use crate::pacer::Pacer;
use crate::replicator::Replicator;
use crate::snapshot::SnapshotEngine;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub source_path: PathBuf,
    pub bucket: String,
    pub key: String,
    pub retry_backoff: Duration,
    pub stage_timeout: Option<Duration>,
}

impl From<&BackupConfig> for SchedulerSettings {
    fn from(config: &BackupConfig) -> Self {
        Self {
            source_path: config.source_path.clone(),
            bucket: config.remote.bucket.clone(),
            key: config.remote.key.clone(),
            retry_backoff: config.retry_backoff,
            stage_timeout: config.stage_timeout,
        }
    }
}

pub struct BackupScheduler {
    settings: SchedulerSettings,
    snapshotter: Arc<dyn SnapshotEngine>,
    replicator: Arc<dyn Replicator>,
    health: Arc<dyn HealthReporter>,
    clock: Arc<dyn Clock>,
    pacer: Box<dyn Pacer>,

    state: RunState,
    current: Option<BackupRun>,
    last_run: Option<BackupRun>,
}

impl BackupScheduler {
    pub fn new(
        settings: SchedulerSettings,
        snapshotter: Arc<dyn SnapshotEngine>,
        replicator: Arc<dyn Replicator>,
        health: Arc<dyn HealthReporter>,
        clock: Arc<dyn Clock>,
        pacer: Box<dyn Pacer>,
    ) -> Self {
        Self {
            settings,
            snapshotter,
            replicator,
            health,
            clock,
            pacer,
            state: RunState::INITIAL,
            current: None,
            last_run: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// The run currently between start and outcome, if any.
    pub fn current_run(&self) -> Option<&BackupRun> {
        self.current.as_ref()
    }

    /// Most recently finished run, successful or not.
    pub fn last_run(&self) -> Option<&BackupRun> {
        self.last_run.as_ref()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run_forever())
    }

    /// Never returns; the loop ends only with the process.
    pub async fn run_forever(mut self) {
        loop {
            if let Err(e) = self.step().await {
                error!(error = %e, "backup loop out of sync, starting over after backoff");
                self.current = None;
                self.state = RunState::Backoff;
            }
        }
    }

    /// Performs the work of the current state and moves to the next one.
    pub async fn step(&mut self) -> Result<RunState, InvalidTransition> {
        let event = match self.state {
            RunState::Snapshotting => self.snapshot_stage().await,
            RunState::Replicating => self.replicate_stage().await,
            RunState::Reporting => self.report(),
            RunState::Idle => {
                self.pacer.next_tick().await;
                RunEvent::TickDue
            }
            RunState::Backoff => {
                self.pacer.backoff(self.settings.retry_backoff).await;
                RunEvent::BackoffElapsed
            }
        };

        let next = self.state.on(event)?;
        debug!(from = %self.state, to = %next, ?event, "backup state transition");
        self.state = next;
        Ok(next)
    }

    async fn snapshot_stage(&mut self) -> RunEvent {
        let run = BackupRun::begin(self.clock.now_ms());
        info!(
            run_id = %run.id,
            source = %self.settings.source_path.display(),
            staging = %self.snapshotter.staging_path().display(),
            "starting a new backup"
        );
        self.current = Some(run);

        let result = within(
            self.settings.stage_timeout,
            Stage::Snapshot,
            self.snapshotter.snapshot(&self.settings.source_path),
        )
        .await;

        match result {
            Ok(()) => {
                debug!("local snapshot finished");
                RunEvent::SnapshotSucceeded
            }
            Err(e) => {
                let event = self.fail(e);
                // a timed out copy may still be writing the staging file
                self.snapshotter.settle().await;
                event
            }
        }
    }

    async fn replicate_stage(&mut self) -> RunEvent {
        let result = within(
            self.settings.stage_timeout,
            Stage::Replicate,
            self.replicator.upload(
                self.snapshotter.staging_path(),
                &self.settings.bucket,
                &self.settings.key,
            ),
        )
        .await;

        match result {
            Ok(()) => RunEvent::UploadSucceeded,
            Err(e) => self.fail(e),
        }
    }

    fn report(&mut self) -> RunEvent {
        let finished = self.clock.now_ms();
        if let Some(mut run) = self.current.take() {
            run.succeed(finished);
            let duration_ms = run.duration_ms().unwrap_or_default();
            self.health.record_success(duration_ms);
            info!(run_id = %run.id, duration_ms, "backup finished successfully");
            self.last_run = Some(run);
        }
        RunEvent::Reported
    }

    fn fail(&mut self, err: StageError) -> RunEvent {
        let stage = err.stage();
        let cause = error_chain(&err);
        self.health.record_failure();

        if let Some(mut run) = self.current.take() {
            warn!(
                run_id = %run.id,
                %stage,
                error = %cause,
                retry_in = ?self.settings.retry_backoff,
                "backup failed, retrying after backoff"
            );
            run.fail(stage, cause);
            self.last_run = Some(run);
        }

        match stage {
            Stage::Snapshot => RunEvent::SnapshotFailed,
            Stage::Replicate => RunEvent::UploadFailed,
        }
    }
}

async fn within<F, E>(limit: Option<Duration>, stage: Stage, fut: F) -> Result<(), StageError>
where
    F: Future<Output = Result<(), E>>,
    E: Into<StageError>,
{
    match limit {
        Some(after) => match tokio::time::timeout(after, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(StageError::TimedOut { stage, after }),
        },
        None => fut.await.map_err(Into::into),
    }
}
