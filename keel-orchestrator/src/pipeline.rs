//! Run orchestration
//!
//! Drives the run state machine:
//!
//! ```text
//! Idle -> Detecting -> MatrixComputed -> Skipped -----------------> Done(success)
//!                  \                 \-> FanningOut -> Aggregating -> Done(outcome)
//!                   \-> Done(failed)  \-> Done(failed)
//! ```
//!
//! Run-level failures (history, builder preflight, registry auth) end the run
//! before any unit is spawned. Unit failures only ever show up in their own
//! `BuildResult`.
//!
//! Cancellation requested through the [`CancelHandle`] before or during a run
//! applies to that run and is cleared once it finishes.

use chrono::Utc;
use keel_core::config::PipelineConfig;
use keel_core::domain::build::BuildResult;
use keel_core::domain::change::Revision;
use keel_core::domain::matrix::BuildMatrix;
use keel_core::domain::run::{RunOutcome, RunReport, RunState};
use keel_core::domain::service::PathRegistry;
use keel_core::error::Result;
use keel_runner::BuildUnit;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::git::ChangeDetector;
use crate::scheduler::{CancelHandle, Scheduler};

/// Runs change detection, matrix computation and the parallel build fan-out
pub struct Orchestrator {
    detector: Arc<dyn ChangeDetector>,
    registry: PathRegistry,
    unit: Arc<BuildUnit>,
    scheduler: Scheduler,
    state: watch::Sender<RunState>,
}

impl Orchestrator {
    pub fn new(
        pipeline: &PipelineConfig,
        detector: Arc<dyn ChangeDetector>,
        unit: Arc<BuildUnit>,
    ) -> Result<Self> {
        let (state, _) = watch::channel(RunState::Idle);

        Ok(Self {
            detector,
            registry: pipeline.registry()?,
            unit,
            scheduler: Scheduler::new(pipeline.max_parallel, pipeline.fail_fast),
            state,
        })
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Receives every state the orchestrator moves through
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.scheduler.cancel_handle()
    }

    /// Computes the build matrix for `base..head` without building anything
    pub async fn plan(&self, base: &Revision, head: &Revision) -> Result<BuildMatrix> {
        let changes = self.detector.detect(base, head).await?;
        Ok(BuildMatrix::compute(&changes, &self.registry))
    }

    /// Executes one run. Never fails outright: run-level errors end up in
    /// the report with outcome `failed`.
    pub async fn run(&self, base: Revision, head: Revision) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut matrix = BuildMatrix::default();
        let mut refs = (base, head);

        if self.state().is_terminal() {
            self.state.send_replace(RunState::Idle);
        }

        let span = info_span!("run", %run_id, head = %refs.1.short());
        let outcome = self.drive(&mut refs, &mut matrix).instrument(span).await;
        self.scheduler.cancel_handle().reset();

        let (base, head) = refs;
        match outcome {
            Ok(results) => {
                let report = RunReport::completed(run_id, base, head, matrix, results, started_at);
                if let Err(e) = self.advance(RunState::Done(report.outcome)) {
                    error!("{}", e);
                }
                info!("Run {} finished: {}", run_id, report.outcome);
                report
            }
            Err(e) => {
                error!("Run {} aborted: {}", run_id, e);
                if let Err(transition) = self.advance(RunState::Done(RunOutcome::Failed)) {
                    warn!("{}", transition);
                }
                RunReport::failed(run_id, base, head, matrix, &e, started_at)
            }
        }
    }

    /// Replaces `refs` with the resolved commit ids once detection succeeds
    async fn drive(
        &self,
        refs: &mut (Revision, Revision),
        matrix: &mut BuildMatrix,
    ) -> Result<Vec<BuildResult>> {
        self.advance(RunState::Detecting)?;
        info!("Detecting changes between {} and {}", refs.0, refs.1);
        let changes = self.detector.detect(&refs.0, &refs.1).await?;
        *refs = (changes.base.clone().into(), changes.head.clone().into());

        *matrix = BuildMatrix::compute(&changes, &self.registry);
        self.advance(RunState::MatrixComputed)?;
        info!(
            "{} changed path(s), {} service(s) to build: {:?}",
            changes.len(),
            matrix.len(),
            matrix.names()
        );

        if matrix.is_empty() {
            self.advance(RunState::Skipped)?;
            info!("No watched service changed, skipping fan-out");
            return Ok(Vec::new());
        }

        self.unit.check_builder().await?;
        self.unit.publisher().login().await?;

        self.advance(RunState::FanningOut)?;
        let unit = Arc::clone(&self.unit);
        let head = changes.head;
        let results = self
            .scheduler
            .fan_out(matrix.entries(), move |service| {
                let unit = Arc::clone(&unit);
                let head = head.clone();
                async move { unit.run(&service, &head).await }
            })
            .await;

        self.advance(RunState::Aggregating)?;
        Ok(results)
    }

    fn advance(&self, next: RunState) -> Result<()> {
        let current = self.state();
        let next = current.transition(next)?;
        debug!("Run state {} -> {}", current, next);
        self.state.send_replace(next);
        Ok(())
    }
}
