//! Consistent copies of a live SQLite file via the online backup API.
//!
//! The copy runs as one `step(-1)`: every page in a single pass under
//! SQLite's own locking, so the result matches some committed state of the
//! source between the start and end of the step, even with writers active.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use backup_core::SnapshotError;
use rusqlite::backup::{Backup, StepResult};
use rusqlite::{Connection, OpenFlags};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const SOURCE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait SnapshotEngine: Send + Sync {
    /// Fixed local path the snapshot is written to.
    fn staging_path(&self) -> &Path;

    async fn snapshot(&self, source: &Path) -> Result<(), SnapshotError>;

    /// Waits for a copy whose `snapshot` call was dropped before it finished.
    /// Once this returns nothing writes to the staging path.
    async fn settle(&self) {}
}

type CopyTask = JoinHandle<Result<(), SnapshotError>>;

#[derive(Debug)]
pub struct SqliteSnapshotter {
    staging_path: PathBuf,
    // the copy in flight; left behind when a caller stops waiting for it
    running: Mutex<Option<CopyTask>>,
}

impl SqliteSnapshotter {
    pub fn new(staging_path: impl Into<PathBuf>) -> Self {
        Self {
            staging_path: staging_path.into(),
            running: Mutex::new(None),
        }
    }

    /// Blocking variant; the async trait method runs this on the blocking pool.
    pub fn snapshot_blocking(&self, source: &Path) -> Result<(), SnapshotError> {
        copy_online(source, &self.staging_path)
    }
}

#[async_trait]
impl SnapshotEngine for SqliteSnapshotter {
    fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    async fn snapshot(&self, source: &Path) -> Result<(), SnapshotError> {
        let mut running = self.running.lock().await;
        wait_abandoned(&mut running).await;

        let source = source.to_path_buf();
        let staging = self.staging_path.clone();
        let copy = running.insert(tokio::task::spawn_blocking(move || {
            copy_online(&source, &staging)
        }));
        let joined = copy.await;
        *running = None;

        joined.map_err(|e| SnapshotError::CopyIncomplete {
            detail: "snapshot task did not run to completion".into(),
            cause: Some(Box::new(e)),
        })?
    }

    async fn settle(&self) {
        let mut running = self.running.lock().await;
        wait_abandoned(&mut running).await;
    }
}

async fn wait_abandoned(running: &mut Option<CopyTask>) {
    if let Some(copy) = running.as_mut() {
        match copy.await {
            Ok(Ok(())) => debug!("abandoned copy finished"),
            Ok(Err(e)) => debug!(error = %e, "abandoned copy failed"),
            Err(e) => warn!(error = %e, "abandoned copy task died"),
        }
        *running = None;
    }
}

fn copy_online(source: &Path, staging: &Path) -> Result<(), SnapshotError> {
    let src = open_source(source)?;

    remove_staging(staging)?;
    let mut dst = Connection::open(staging).map_err(|e| SnapshotError::StagingUnavailable {
        path: staging.to_path_buf(),
        cause: Box::new(e),
    })?;

    {
        let backup = Backup::new(&src, &mut dst).map_err(|e| SnapshotError::CopyIncomplete {
            detail: "could not start online backup".into(),
            cause: Some(Box::new(e)),
        })?;
        check_step(backup.step(-1))?;
        // rusqlite 0.31 has no public finish: Drop calls sqlite3_backup_finish
        // and discards its result. A failed finish leaves the destination
        // unusable, which the close below reports.
    }

    dst.close().map_err(|(_, e)| SnapshotError::FinalizeFailed {
        path: staging.to_path_buf(),
        cause: Box::new(e),
    })?;

    debug!(source = %source.display(), staging = %staging.display(), "online copy finished");
    Ok(())
}

/// A single `step(-1)` either copies every page or the copy is incomplete.
fn check_step(step: rusqlite::Result<StepResult>) -> Result<(), SnapshotError> {
    match step {
        Ok(StepResult::Done) => Ok(()),
        Ok(partial) => Err(SnapshotError::CopyIncomplete {
            detail: format!("backup step returned {partial:?} instead of Done"),
            cause: None,
        }),
        Err(e) => Err(SnapshotError::CopyIncomplete {
            detail: "backup step failed".into(),
            cause: Some(Box::new(e)),
        }),
    }
}

/// Read-only handle plus a probe of the schema cookie, so an unreadable or
/// non-database source fails here rather than halfway through the copy.
fn open_source(source: &Path) -> Result<Connection, SnapshotError> {
    let unavailable = |e: rusqlite::Error| SnapshotError::SourceUnavailable {
        path: source.to_path_buf(),
        cause: Box::new(e),
    };

    let conn = Connection::open_with_flags(
        source,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(unavailable)?;
    conn.busy_timeout(SOURCE_BUSY_TIMEOUT).map_err(unavailable)?;
    conn.pragma_query_value(None, "schema_version", |row| row.get::<_, i64>(0))
        .map_err(unavailable)?;
    Ok(conn)
}

fn remove_staging(staging: &Path) -> Result<(), SnapshotError> {
    match std::fs::remove_file(staging) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SnapshotError::StagingUnavailable {
            path: staging.to_path_buf(),
            cause: Box::new(e),
        }),
    }
}
