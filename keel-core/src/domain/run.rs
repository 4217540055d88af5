//! Pipeline run domain types
//!
//! A run moves through a fixed state machine:
//! `Idle -> Detecting -> MatrixComputed -> (Skipped | FanningOut) -> Aggregating -> Done`.
//! Run-level failures jump straight to `Done(Failed)`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::build::BuildResult;
use crate::domain::change::Revision;
use crate::domain::matrix::BuildMatrix;
use crate::error::{FailureKind, PipelineError, Result};

/// Final outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every unit succeeded, or there was nothing to build
    Success,
    /// At least one unit succeeded and at least one failed
    PartialFailure,
    /// Every unit failed
    AllFailed,
    /// The run aborted before any unit started
    Failed,
}

impl RunOutcome {
    /// Aggregates unit results
    pub fn from_results(results: &[BuildResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();

        if succeeded == results.len() {
            RunOutcome::Success
        } else if succeeded == 0 {
            RunOutcome::AllFailed
        } else {
            RunOutcome::PartialFailure
        }
    }

    pub fn is_success(self) -> bool {
        self == RunOutcome::Success
    }

    /// Process exit code for this outcome
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::PartialFailure => 1,
            RunOutcome::AllFailed => 2,
            RunOutcome::Failed => 3,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RunOutcome::Success => "success",
            RunOutcome::PartialFailure => "partialFailure",
            RunOutcome::AllFailed => "allFailed",
            RunOutcome::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Detecting,
    MatrixComputed,
    Skipped,
    FanningOut,
    Aggregating,
    Done(RunOutcome),
}

impl RunState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: &RunState) -> bool {
        use RunState::*;

        matches!(
            (self, next),
            (Idle, Detecting)
                | (Detecting, MatrixComputed)
                | (Detecting, Done(RunOutcome::Failed))
                | (MatrixComputed, Skipped)
                | (MatrixComputed, FanningOut)
                | (MatrixComputed, Done(RunOutcome::Failed))
                | (Skipped, Done(RunOutcome::Success))
                | (FanningOut, Aggregating)
                | (
                    Aggregating,
                    Done(RunOutcome::Success | RunOutcome::PartialFailure | RunOutcome::AllFailed)
                )
        )
    }

    /// Moves to `next`, rejecting illegal transitions
    pub fn transition(self, next: RunState) -> Result<RunState> {
        if self.can_transition_to(&next) {
            Ok(next)
        } else {
            Err(PipelineError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done(_))
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => f.write_str("Idle"),
            RunState::Detecting => f.write_str("Detecting"),
            RunState::MatrixComputed => f.write_str("MatrixComputed"),
            RunState::Skipped => f.write_str("Skipped"),
            RunState::FanningOut => f.write_str("FanningOut"),
            RunState::Aggregating => f.write_str("Aggregating"),
            RunState::Done(outcome) => write!(f, "Done({})", outcome),
        }
    }
}

/// Run-level failure description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&PipelineError> for RunFailure {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Everything a finished run reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Resolved commit ids once detection succeeded, else the requested revisions
    pub base: Revision,
    pub head: Revision,
    pub matrix: BuildMatrix,
    pub results: Vec<BuildResult>,
    pub outcome: RunOutcome,
    pub error: Option<RunFailure>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl RunReport {
    /// Report for a run that aggregated unit results
    pub fn completed(
        run_id: Uuid,
        base: Revision,
        head: Revision,
        matrix: BuildMatrix,
        results: Vec<BuildResult>,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            run_id,
            base,
            head,
            matrix,
            outcome: RunOutcome::from_results(&results),
            results,
            error: None,
            started_at,
            finished_at: chrono::Utc::now(),
        }
    }

    /// Report for a run that aborted before fan-out
    pub fn failed(
        run_id: Uuid,
        base: Revision,
        head: Revision,
        matrix: BuildMatrix,
        error: &PipelineError,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            run_id,
            base,
            head,
            matrix,
            results: Vec::new(),
            outcome: RunOutcome::Failed,
            error: Some(error.into()),
            started_at,
            finished_at: chrono::Utc::now(),
        }
    }

    /// Unit results that failed
    pub fn failures(&self) -> impl Iterator<Item = &BuildResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "run {} ({}..{}): {}",
            self.run_id,
            self.base.short(),
            self.head.short(),
            self.outcome
        )?;

        if let Some(err) = &self.error {
            writeln!(f, "  aborted: [{}] {}", err.kind, err.message)?;
            return Ok(());
        }

        if self.matrix.is_empty() {
            writeln!(f, "  no watched service changed, nothing to build")?;
            return Ok(());
        }

        for result in &self.results {
            if result.success {
                let tags: Vec<&str> = result.tags.iter().map(String::as_str).collect();
                writeln!(f, "  ok     {} -> {}", result.service.name, tags.join(", "))?;
            } else {
                writeln!(
                    f,
                    "  FAILED {} [{}] {}",
                    result.service.name,
                    result
                        .failure
                        .map(|k| k.to_string())
                        .unwrap_or_else(|| "Unknown".to_string()),
                    result.error.as_deref().unwrap_or("no error message")
                )?;
            }
            for warning in &result.warnings {
                writeln!(f, "  warn   {}: {}", result.service.name, warning)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::service::ServiceDescriptor;

    fn ok(name: &str) -> BuildResult {
        BuildResult::succeeded(
            ServiceDescriptor::from_path(&format!("src/{}", name)).unwrap(),
            [format!("acme/{}:latest", name)],
        )
    }

    fn failed(name: &str) -> BuildResult {
        BuildResult::failed(
            ServiceDescriptor::from_path(&format!("src/{}", name)).unwrap(),
            &PipelineError::DescriptorNotFound {
                service: name.to_string(),
            },
        )
    }

    #[test]
    fn test_outcome_aggregation() {
        assert_eq!(RunOutcome::from_results(&[]), RunOutcome::Success);
        assert_eq!(RunOutcome::from_results(&[ok("a"), ok("b")]), RunOutcome::Success);
        assert_eq!(
            RunOutcome::from_results(&[ok("a"), failed("b")]),
            RunOutcome::PartialFailure
        );
        assert_eq!(
            RunOutcome::from_results(&[failed("a"), failed("b")]),
            RunOutcome::AllFailed
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::Success.exit_code(), 0);
        assert_ne!(RunOutcome::PartialFailure.exit_code(), 0);
        assert_ne!(RunOutcome::AllFailed.exit_code(), 0);
        assert_ne!(RunOutcome::Failed.exit_code(), 0);
    }

    #[test]
    fn test_happy_path_transitions() {
        let state = RunState::Idle
            .transition(RunState::Detecting)
            .and_then(|s| s.transition(RunState::MatrixComputed))
            .and_then(|s| s.transition(RunState::FanningOut))
            .and_then(|s| s.transition(RunState::Aggregating))
            .and_then(|s| s.transition(RunState::Done(RunOutcome::PartialFailure)))
            .unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_skip_path_only_ends_in_success() {
        assert!(RunState::Skipped.can_transition_to(&RunState::Done(RunOutcome::Success)));
        assert!(!RunState::Skipped.can_transition_to(&RunState::Done(RunOutcome::AllFailed)));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(RunState::Idle.transition(RunState::FanningOut).is_err());
        assert!(RunState::Detecting.transition(RunState::Skipped).is_err());
        assert!(
            RunState::Aggregating
                .transition(RunState::Done(RunOutcome::Failed))
                .is_err()
        );
        assert!(
            RunState::Done(RunOutcome::Success)
                .transition(RunState::Idle)
                .is_err()
        );
    }

    #[test]
    fn test_report_summary_names_failed_services() {
        let base = Revision::new("1111111aaaa").unwrap();
        let head = Revision::new("2222222bbbb").unwrap();
        let results = vec![ok("frontend"), failed("cartservice")];
        let matrix = BuildMatrix::from(
            results
                .iter()
                .map(|r| r.service.clone())
                .collect::<Vec<_>>(),
        );
        let report = RunReport::completed(
            Uuid::new_v4(),
            base,
            head,
            matrix,
            results,
            chrono::Utc::now(),
        );

        assert_eq!(report.outcome, RunOutcome::PartialFailure);
        assert_eq!(report.failures().count(), 1);

        let summary = report.to_string();
        assert!(summary.contains("partialFailure"));
        assert!(summary.contains("FAILED cartservice [DescriptorNotFound]"));
        assert!(summary.contains("ok     frontend"));
    }

    #[test]
    fn test_failed_report_has_no_results() {
        let err = PipelineError::HistoryUnavailable("shallow clone".to_string());
        let report = RunReport::failed(
            Uuid::new_v4(),
            Revision::new("aaaaaaa").unwrap(),
            Revision::new("bbbbbbb").unwrap(),
            BuildMatrix::default(),
            &err,
            chrono::Utc::now(),
        );
        assert_eq!(report.outcome, RunOutcome::Failed);
        assert_eq!(report.exit_code(), 3);
        assert!(report.to_string().contains("HistoryUnavailable"));
    }
}
