//! The backup loop as an explicit state machine.
//!
//! Success path: Snapshotting -> Replicating -> Reporting -> Idle -> Snapshotting.
//! A failed stage goes to Backoff, and Backoff always re-enters Snapshotting;
//! a retry never waits for the periodic tick.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Snapshotting,
    Replicating,
    Reporting,
    Backoff,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunEvent {
    TickDue,
    SnapshotSucceeded,
    SnapshotFailed,
    UploadSucceeded,
    UploadFailed,
    Reported,
    BackoffElapsed,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid transition: {event:?} while {from}")]
pub struct InvalidTransition {
    pub from: RunState,
    pub event: RunEvent,
}

impl RunState {
    /// The loop starts copying immediately, without waiting for a tick.
    pub const INITIAL: RunState = RunState::Snapshotting;

    pub fn on(self, event: RunEvent) -> Result<RunState, InvalidTransition> {
        use RunEvent::*;
        use RunState::*;

        let next = match (self, event) {
            (Idle, TickDue) => Snapshotting,
            (Snapshotting, SnapshotSucceeded) => Replicating,
            (Snapshotting, SnapshotFailed) => Backoff,
            (Replicating, UploadSucceeded) => Reporting,
            (Replicating, UploadFailed) => Backoff,
            (Reporting, Reported) => Idle,
            (Backoff, BackoffElapsed) => Snapshotting,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }

    /// True while a run is between its start and its outcome.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            RunState::Snapshotting | RunState::Replicating | RunState::Reporting
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Snapshotting => "snapshotting",
            RunState::Replicating => "replicating",
            RunState::Reporting => "reporting",
            RunState::Backoff => "backoff",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RunEvent::*;
    use RunState::*;

    fn walk(start: RunState, events: &[RunEvent]) -> Result<RunState, InvalidTransition> {
        events.iter().try_fold(start, |s, e| s.on(*e))
    }

    #[test]
    fn success_path_returns_to_idle() {
        let end = walk(
            RunState::INITIAL,
            &[SnapshotSucceeded, UploadSucceeded, Reported],
        )
        .unwrap();
        assert_eq!(end, Idle);
        assert_eq!(end.on(TickDue).unwrap(), Snapshotting);
    }

    #[test]
    fn failures_back_off_then_resnapshot() {
        assert_eq!(walk(Snapshotting, &[SnapshotFailed]).unwrap(), Backoff);
        assert_eq!(
            walk(Snapshotting, &[SnapshotSucceeded, UploadFailed, BackoffElapsed]).unwrap(),
            Snapshotting
        );
    }

    #[test]
    fn backoff_never_waits_for_tick() {
        assert_eq!(
            Backoff.on(TickDue),
            Err(InvalidTransition {
                from: Backoff,
                event: TickDue
            })
        );
    }

    #[test]
    fn idle_rejects_stage_results() {
        for e in [SnapshotSucceeded, SnapshotFailed, UploadSucceeded, UploadFailed, Reported] {
            assert!(Idle.on(e).is_err(), "{e:?} accepted while idle");
        }
    }

    #[test]
    fn cannot_skip_replication() {
        assert!(Snapshotting.on(UploadSucceeded).is_err());
        assert!(Snapshotting.on(Reported).is_err());
    }

    #[test]
    fn in_flight_states() {
        assert!(Snapshotting.is_in_flight());
        assert!(Replicating.is_in_flight());
        assert!(Reporting.is_in_flight());
        assert!(!Idle.is_in_flight());
        assert!(!Backoff.is_in_flight());
    }
}
