//! Periodic removal of abandoned sessions.
//!
//! A session's last activity is the newest modification time among its
//! directory and the files in it; every stored chunk renames a fresh file into
//! the directory, so an active session always looks young. Sessions whose lock
//! is held by an in-flight write or assembly are skipped until the next tick.

use super::{
    chunk_store::ChunkStore,
    error::{UploadError, UploadResult},
    session_locks::SessionLocks,
};
use chrono::{DateTime, Utc};
use std::{
    io::ErrorKind,
    path::Path,
    time::{Duration, SystemTime},
};
use tokio::{fs, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct SessionReaper {
    store: ChunkStore,
    locks: SessionLocks,
    timeout: Duration,
    interval: Duration,
}

/// Outcome of a single sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub reaped: Vec<String>,
    pub busy: Vec<String>,
    pub kept: usize,
    /// Leftover directories of already published sessions.
    pub purged: usize,
}

impl SessionReaper {
    pub fn new(store: ChunkStore, locks: SessionLocks, timeout: Duration, interval: Duration) -> Self {
        Self {
            store,
            locks,
            timeout,
            interval,
        }
    }

    /// Run `sweep` every `interval` until the returned task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; skip it so startup isn't a sweep.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.sweep().await {
                    Ok(report) if !report.reaped.is_empty() || report.purged > 0 => info!(
                        "reaped {} stale session(s), purged {} retired, {} busy, {} kept",
                        report.reaped.len(),
                        report.purged,
                        report.busy.len(),
                        report.kept
                    ),
                    Ok(report) => debug!(
                        "reaper sweep: {} busy, {} kept",
                        report.busy.len(),
                        report.kept
                    ),
                    Err(err) => warn!("reaper sweep failed: {}", err),
                }
            }
        })
    }

    /// Delete every session whose last activity is older than the timeout,
    /// along with stale retired directories.
    pub async fn sweep(&self) -> UploadResult<SweepReport> {
        let mut report = SweepReport::default();
        let now = SystemTime::now();

        for identifier in self.store.session_ids().await? {
            let dir = self.store.session_dir(&identifier)?;
            let Some(last_activity) = newest_mtime(&dir).await? else {
                continue;
            };
            let age = now.duration_since(last_activity).unwrap_or_default();
            if age <= self.timeout {
                report.kept += 1;
                continue;
            }

            let handle = self.locks.handle(&identifier);
            let reaped = match handle.try_write() {
                Ok(_guard) => self.reap(&identifier, last_activity).await,
                Err(_) => {
                    debug!("session {} is busy, not reaping this round", identifier);
                    report.busy.push(identifier.clone());
                    Ok(false)
                }
            };
            self.locks.release(&identifier, handle);

            if reaped? {
                report.reaped.push(identifier);
            }
        }

        for dir in self.store.retired_dirs().await? {
            let Some(last_activity) = newest_mtime(&dir).await? else {
                continue;
            };
            if now.duration_since(last_activity).unwrap_or_default() <= self.timeout {
                continue;
            }
            match fs::remove_dir_all(&dir).await {
                Ok(()) => report.purged += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!("could not purge {}: {}", dir.display(), err),
            }
        }

        Ok(report)
    }

    async fn reap(&self, identifier: &str, last_activity: SystemTime) -> UploadResult<bool> {
        // Re-check under the lock: a write may have landed since the scan.
        let dir = self.store.session_dir(identifier)?;
        match newest_mtime(&dir).await? {
            Some(current) if current > last_activity => return Ok(false),
            None => return Ok(false),
            _ => {}
        }

        let removed = self.store.remove_session(identifier).await?;
        if removed {
            info!(
                "reaped session {} (last active {})",
                identifier,
                DateTime::<Utc>::from(last_activity).to_rfc3339()
            );
        }
        Ok(removed)
    }
}

/// Newest mtime among a session directory and its entries; `None` if it vanished.
async fn newest_mtime(dir: &Path) -> UploadResult<Option<SystemTime>> {
    let mut newest = match fs::metadata(dir).await {
        Ok(meta) => meta.modified()?,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(UploadError::Io(err)),
    };

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(UploadError::Io(err)),
    };
    while let Some(entry) = entries.next_entry().await? {
        match entry.metadata().await {
            Ok(meta) => newest = newest.max(meta.modified()?),
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(UploadError::Io(err)),
        }
    }
    Ok(Some(newest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    const HOUR: Duration = Duration::from_secs(3600);

    fn backdate(path: &Path, by: Duration) {
        let when = SystemTime::now() - by;
        File::open(path).unwrap().set_modified(when).unwrap();
    }

    fn make_session(root: &Path, identifier: &str, age: Duration) {
        let dir = root.join(identifier);
        std::fs::create_dir(&dir).unwrap();
        let chunk = dir.join("1");
        std::fs::write(&chunk, b"chunk").unwrap();
        backdate(&chunk, age);
        backdate(&dir, age);
    }

    fn reaper(root: &Path, locks: &SessionLocks) -> SessionReaper {
        SessionReaper::new(ChunkStore::new(root), locks.clone(), HOUR, HOUR)
    }

    #[tokio::test]
    async fn stale_sessions_go_and_young_ones_stay() {
        let root = tempfile::tempdir().unwrap();
        make_session(root.path(), "stale", 2 * HOUR);
        make_session(root.path(), "fresh", Duration::from_secs(60));

        let locks = SessionLocks::new();
        let report = reaper(root.path(), &locks).sweep().await.unwrap();

        assert_eq!(report.reaped, vec!["stale".to_string()]);
        assert_eq!(report.kept, 1);
        assert!(!root.path().join("stale").exists());
        assert!(root.path().join("fresh").join("1").exists());
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn a_recent_chunk_keeps_an_old_directory_alive() {
        let root = tempfile::tempdir().unwrap();
        make_session(root.path(), "resumed", 2 * HOUR);
        std::fs::write(root.path().join("resumed").join("2"), b"new").unwrap();
        backdate(&root.path().join("resumed"), 2 * HOUR);

        let report = reaper(root.path(), &SessionLocks::new()).sweep().await.unwrap();
        assert!(report.reaped.is_empty());
        assert!(root.path().join("resumed").exists());
    }

    #[tokio::test]
    async fn busy_sessions_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        make_session(root.path(), "busy", 2 * HOUR);

        let locks = SessionLocks::new();
        let handle = locks.handle("busy");
        let guard = handle.read().await;

        let report = reaper(root.path(), &locks).sweep().await.unwrap();
        assert_eq!(report.busy, vec!["busy".to_string()]);
        assert!(root.path().join("busy").exists());

        drop(guard);
        let report = reaper(root.path(), &locks).sweep().await.unwrap();
        assert_eq!(report.reaped, vec!["busy".to_string()]);
    }

    #[tokio::test]
    async fn probe_scratch_and_stray_files_are_left_alone() {
        let root = tempfile::tempdir().unwrap();
        make_session(root.path(), ".capability-probe", 2 * HOUR);
        let stray = root.path().join("notes.txt");
        std::fs::write(&stray, b"x").unwrap();
        backdate(&stray, 2 * HOUR);

        let report = reaper(root.path(), &SessionLocks::new()).sweep().await.unwrap();
        assert!(report.reaped.is_empty());
        assert!(stray.exists());
        assert!(root.path().join(".capability-probe").exists());
    }

    #[tokio::test]
    async fn stale_retired_directories_are_purged() {
        let root = tempfile::tempdir().unwrap();
        make_session(root.path(), ".retired-old", 2 * HOUR);
        make_session(root.path(), ".retired-new", Duration::from_secs(60));

        let report = reaper(root.path(), &SessionLocks::new()).sweep().await.unwrap();
        assert_eq!(report.purged, 1);
        assert!(report.reaped.is_empty());
        assert!(!root.path().join(".retired-old").exists());
        assert!(root.path().join(".retired-new").exists());
    }
}
