//! Failure taxonomy for the two backup stages.

use crate::model::Stage;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Underlying error carried for diagnostics.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("source database {} is unavailable", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        cause: Cause,
    },

    #[error("staging file {} could not be prepared", path.display())]
    StagingUnavailable {
        path: PathBuf,
        #[source]
        cause: Cause,
    },

    #[error("online copy did not complete: {detail}")]
    CopyIncomplete {
        detail: String,
        #[source]
        cause: Option<Cause>,
    },

    #[error("finalizing staging file {} failed", path.display())]
    FinalizeFailed {
        path: PathBuf,
        #[source]
        cause: Cause,
    },
}

#[derive(Debug, Error)]
pub enum UploadError {
    /// The staging file is missing or unreadable. Right after a successful
    /// snapshot this means a local invariant broke, not a remote problem.
    #[error("could not read {} for upload", path.display())]
    LocalReadError {
        path: PathBuf,
        #[source]
        cause: Cause,
    },

    #[error("could not write {bucket}/{key}")]
    RemoteWriteError {
        bucket: String,
        key: String,
        #[source]
        cause: Cause,
    },
}

/// What the run loop sees when a stage does not succeed.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("{stage} stage timed out after {after:?}")]
    TimedOut { stage: Stage, after: Duration },
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Snapshot(_) => Stage::Snapshot,
            StageError::Upload(_) => Stage::Replicate,
            StageError::TimedOut { stage, .. } => *stage,
        }
    }
}

/// Renders the error and its source chain on one line, `outer: inner: root`.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        out.push_str(": ");
        out.push_str(&e.to_string());
        source = e.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn stage_is_derived_from_variant() {
        let snap = StageError::from(SnapshotError::CopyIncomplete {
            detail: "busy".into(),
            cause: None,
        });
        assert_eq!(snap.stage(), Stage::Snapshot);

        let up = StageError::from(UploadError::RemoteWriteError {
            bucket: "b".into(),
            key: "k".into(),
            cause: Box::new(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
        });
        assert_eq!(up.stage(), Stage::Replicate);

        let t = StageError::TimedOut {
            stage: Stage::Replicate,
            after: Duration::from_secs(5),
        };
        assert_eq!(t.stage(), Stage::Replicate);
        assert_eq!(t.to_string(), "replicate stage timed out after 5s");
    }

    #[test]
    fn chain_includes_cause() {
        let err = StageError::from(SnapshotError::SourceUnavailable {
            path: PathBuf::from("/data/app.db"),
            cause: Box::new(io::Error::new(io::ErrorKind::NotFound, "no such file")),
        });
        assert_eq!(
            error_chain(&err),
            "source database /data/app.db is unavailable: no such file"
        );
    }

    #[test]
    fn finalize_failure_names_the_staging_file() {
        let err = StageError::from(SnapshotError::FinalizeFailed {
            path: PathBuf::from("/tmp/backup.db3"),
            cause: Box::new(io::Error::new(io::ErrorKind::Other, "disk I/O error")),
        });
        assert_eq!(err.stage(), Stage::Snapshot);
        assert_eq!(
            error_chain(&err),
            "finalizing staging file /tmp/backup.db3 failed: disk I/O error"
        );
    }
}
