//! One-time capability check of the chunk root.
//!
//! Before any chunk touches the disk the root must prove it supports the full
//! create/write/read/delete cycle. The check is expensive, so the outcome of the
//! first run (success or the specific failure) is cached for the lifetime of the
//! `DirectoryProbe`, and concurrent first callers wait on the same run.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{fs, sync::OnceCell};
use tracing::{debug, info, warn};

const PROBE_DIR: &str = ".capability-probe";
const PROBE_SUBDIR: &str = "42";
const PROBE_FILE: &str = "probe.bin";
const PROBE_CONTENT: &[u8] = b"chunkyard capability probe: the quick brown fox \
jumps over the lazy dog 0123456789 \x00\x01\x02\xfe\xff";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("the chunk root doesn't exist or isn't a directory")]
    NoRootDirectory,
    #[error("can't create a directory under the chunk root")]
    CannotCreate,
    #[error("can't write a file under the chunk root")]
    CannotWrite,
    #[error("can't read a file under the chunk root (or got back bad data)")]
    CannotRead,
    #[error("can't delete a file or directory under the chunk root")]
    CannotDelete,
}

/// Cached outcome of the capability check for a single root.
///
/// Cloning shares the cache, so every handler sees the first caller's result.
#[derive(Clone, Debug)]
pub struct DirectoryProbe {
    root: PathBuf,
    outcome: Arc<OnceCell<Result<(), ConfigurationError>>>,
}

impl DirectoryProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            outcome: Arc::new(OnceCell::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run the probe once and return the cached outcome on every later call.
    pub async fn check(&self) -> Result<(), ConfigurationError> {
        *self
            .outcome
            .get_or_init(|| async {
                let outcome = run_probe(&self.root).await;
                match outcome {
                    Ok(()) => info!("chunk root {} passed capability probe", self.root.display()),
                    Err(err) => warn!(
                        "chunk root {} failed capability probe: {}",
                        self.root.display(),
                        err
                    ),
                }
                outcome
            })
            .await
    }

    /// The cached outcome, if the probe has already run.
    pub fn cached(&self) -> Option<Result<(), ConfigurationError>> {
        self.outcome.get().copied()
    }
}

async fn run_probe(root: &Path) -> Result<(), ConfigurationError> {
    match fs::metadata(root).await {
        Ok(meta) if meta.is_dir() => {}
        _ => return Err(ConfigurationError::NoRootDirectory),
    }

    let probe_root = root.join(PROBE_DIR);
    let nested = probe_root.join(PROBE_SUBDIR);
    fs::create_dir_all(&nested)
        .await
        .map_err(|_| ConfigurationError::CannotCreate)?;

    let file = nested.join(PROBE_FILE);
    fs::write(&file, PROBE_CONTENT)
        .await
        .map_err(|_| ConfigurationError::CannotWrite)?;

    let read_back = fs::read(&file)
        .await
        .map_err(|_| ConfigurationError::CannotRead)?;
    if read_back != PROBE_CONTENT {
        debug!(
            "probe read back {} bytes, wrote {}",
            read_back.len(),
            PROBE_CONTENT.len()
        );
        return Err(ConfigurationError::CannotRead);
    }

    fs::remove_dir_all(&probe_root)
        .await
        .map_err(|_| ConfigurationError::CannotDelete)?;

    if is_system_temp(root) {
        warn!(
            "chunk root {} is the system temp directory; consider a dedicated subdirectory",
            root.display()
        );
    }

    Ok(())
}

fn is_system_temp(root: &Path) -> bool {
    let tmp = std::env::temp_dir();
    match (root.canonicalize(), tmp.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => root == tmp,
    }
}

/// True when `name` is the probe's own scratch directory.
pub(crate) fn is_probe_entry(name: &str) -> bool {
    name == PROBE_DIR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_on_writable_root_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let probe = DirectoryProbe::new(dir.path());

        assert_eq!(probe.check().await, Ok(()));
        assert!(!dir.path().join(PROBE_DIR).exists());
        assert_eq!(probe.cached(), Some(Ok(())));
    }

    #[tokio::test]
    async fn missing_root_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let probe = DirectoryProbe::new(dir.path().join("nope"));

        assert_eq!(probe.check().await, Err(ConfigurationError::NoRootDirectory));
    }

    #[tokio::test]
    async fn root_that_is_a_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();

        let probe = DirectoryProbe::new(&file);
        assert_eq!(probe.check().await, Err(ConfigurationError::NoRootDirectory));
    }

    #[tokio::test]
    async fn failure_is_cached_even_after_the_root_is_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("later");
        let probe = DirectoryProbe::new(&root);

        assert_eq!(probe.check().await, Err(ConfigurationError::NoRootDirectory));

        std::fs::create_dir(&root).unwrap();
        assert_eq!(probe.check().await, Err(ConfigurationError::NoRootDirectory));
        assert_eq!(probe.clone().check().await, Err(ConfigurationError::NoRootDirectory));
        assert!(!root.join(PROBE_DIR).exists());
    }

    #[tokio::test]
    async fn success_is_cached_without_touching_disk_again() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir(&root).unwrap();
        let probe = DirectoryProbe::new(&root);

        assert_eq!(probe.check().await, Ok(()));
        std::fs::remove_dir(&root).unwrap();
        assert_eq!(probe.check().await, Ok(()));
    }

    #[tokio::test]
    async fn concurrent_first_callers_share_one_run() {
        let dir = tempfile::tempdir().unwrap();
        let probe = DirectoryProbe::new(dir.path());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let probe = probe.clone();
                tokio::spawn(async move { probe.check().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(()));
        }
        assert!(!dir.path().join(PROBE_DIR).exists());
    }
}
