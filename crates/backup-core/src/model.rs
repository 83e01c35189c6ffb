use crate::time::EpochMs;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// The two stages of a backup run that can fail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Snapshot,
    Replicate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Snapshot => f.write_str("snapshot"),
            Stage::Replicate => f.write_str("replicate"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunOutcome {
    Success,
    Failed { stage: Stage, cause: String },
}

/// One iteration of the backup loop. A retry after backoff is a new run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRun {
    pub id: Ulid,
    pub started_at_ms: EpochMs,
    /// Only set once the run completed successfully.
    pub finished_at_ms: Option<EpochMs>,
    /// None while the run is in flight.
    pub outcome: Option<RunOutcome>,
}

impl BackupRun {
    pub fn begin(started_at_ms: EpochMs) -> Self {
        Self {
            id: Ulid::new(),
            started_at_ms,
            finished_at_ms: None,
            outcome: None,
        }
    }

    pub fn succeed(&mut self, finished_at_ms: EpochMs) {
        self.finished_at_ms = Some(finished_at_ms);
        self.outcome = Some(RunOutcome::Success);
    }

    pub fn fail(&mut self, stage: Stage, cause: impl Into<String>) {
        self.finished_at_ms = None;
        self.outcome = Some(RunOutcome::Failed {
            stage,
            cause: cause.into(),
        });
    }

    /// Defined only for successful runs. Clamped at zero if the clock stepped back.
    pub fn duration_ms(&self) -> Option<u64> {
        match (&self.outcome, self.finished_at_ms) {
            (Some(RunOutcome::Success), Some(finished)) => {
                Some(finished.saturating_sub(self.started_at_ms).max(0) as u64)
            }
            _ => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.outcome.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_only_on_success() {
        let mut run = BackupRun::begin(1_000);
        assert!(run.is_in_flight());
        assert_eq!(run.duration_ms(), None);

        run.succeed(1_250);
        assert!(!run.is_in_flight());
        assert_eq!(run.duration_ms(), Some(250));
    }

    #[test]
    fn failed_run_has_no_duration() {
        let mut run = BackupRun::begin(1_000);
        run.fail(Stage::Replicate, "access denied");
        assert_eq!(run.duration_ms(), None);
        assert_eq!(run.finished_at_ms, None);
        assert_eq!(
            run.outcome,
            Some(RunOutcome::Failed {
                stage: Stage::Replicate,
                cause: "access denied".into()
            })
        );
    }

    #[test]
    fn backwards_clock_clamps_to_zero() {
        let mut run = BackupRun::begin(5_000);
        run.succeed(4_000);
        assert_eq!(run.duration_ms(), Some(0));
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let v = serde_json::to_value(RunOutcome::Failed {
            stage: Stage::Snapshot,
            cause: "x".into(),
        })
        .unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["stage"], "snapshot");
    }
}
