//! Concatenates a complete session's chunks into the published file.
//!
//! Chunks are read strictly in index order `1..=total_chunks` into a hidden temp
//! file beside the destination; only a fully written, synced temp file is
//! renamed onto the final name. On any failure the temp file is discarded and
//! the chunks stay untouched, so assembly can simply be retried.

use super::{
    chunk_store::ChunkStore,
    error::{UploadError, UploadResult},
};
use crate::models::{chunk::AssembledFile, upload::UploadSession};
use chrono::Utc;
use md5::Context;
use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{info, warn};
use uuid::Uuid;

const COPY_BUF_SIZE: usize = 64 * 1024;
const MAX_PATH_LEN: usize = 1024;
const MAX_NAME_LEN: usize = 255;

#[derive(Clone, Debug)]
pub struct Assembler {
    store: ChunkStore,
    output_dir: PathBuf,
}

impl Assembler {
    pub fn new(store: ChunkStore, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Where a session publishes: `output_dir / parent(relative_path) / filename`.
    pub fn target_path(&self, session: &UploadSession) -> UploadResult<PathBuf> {
        ensure_relative_path_safe(&session.relative_path)?;
        ensure_filename_safe(&session.filename)?;

        let mut path = self.output_dir.clone();
        if let Some(parent) = Path::new(&session.relative_path).parent() {
            path.push(parent);
        }
        path.push(&session.filename);
        Ok(path)
    }

    /// Create the output directory if it is missing.
    pub async fn prepare(&self) -> UploadResult<bool> {
        match fs::metadata(&self.output_dir).await {
            Ok(_) => Ok(false),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&self.output_dir).await?;
                Ok(true)
            }
            Err(err) => Err(UploadError::Io(err)),
        }
    }

    /// Build the final file and clear the session's chunk storage.
    ///
    /// Callers must hold the session's exclusive lock and have confirmed
    /// completion. The session directory is retired before the file is
    /// published, so leftovers of a published session never count as chunks.
    pub async fn assemble(&self, session: &UploadSession) -> UploadResult<AssembledFile> {
        let target = self.target_path(session)?;
        let parent = target.parent().map(Path::to_path_buf).ok_or_else(|| {
            UploadError::InvalidPath(session.relative_path.clone())
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let (size_bytes, etag) = match self.concatenate(session, &tmp_path).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        let retired = match self.store.retire_session(&session.identifier).await {
            Ok(retired) => retired,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        if let Err(err) = publish(&tmp_path, &target).await {
            let _ = fs::remove_file(&tmp_path).await;
            if let Err(restore) = self.store.restore_session(&session.identifier, &retired).await {
                warn!(
                    "could not restore chunks of {} from {}: {}",
                    session.identifier,
                    retired.display(),
                    restore
                );
            }
            return Err(err);
        }

        // The file is published; a retired directory is only garbage for the reaper.
        if let Err(err) = fs::remove_dir_all(&retired).await {
            warn!(
                "assembled {} but could not clear {}: {}",
                session.identifier,
                retired.display(),
                err
            );
        }

        info!(
            "assembled {} into {} ({} bytes)",
            session.identifier,
            target.display(),
            size_bytes
        );

        Ok(AssembledFile {
            path: target,
            size_bytes,
            etag,
            assembled_at: Utc::now(),
        })
    }

    async fn concatenate(
        &self,
        session: &UploadSession,
        tmp_path: &Path,
    ) -> UploadResult<(u64, String)> {
        let mut out = File::create(tmp_path).await?;
        let mut digest = Context::new();
        let mut size_bytes: u64 = 0;
        let mut buf = vec![0u8; COPY_BUF_SIZE];

        for index in 1..=session.total_chunks {
            let chunk = self.store.chunk_path(&session.identifier, index)?;
            let mut src = File::open(&chunk).await?;
            loop {
                let n = src.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                digest.consume(&buf[..n]);
                out.write_all(&buf[..n]).await?;
                size_bytes += n as u64;
            }
        }

        out.flush().await?;
        out.sync_all().await?;
        Ok((size_bytes, format!("{:x}", digest.compute())))
    }
}

/// Rename the finished temp file onto the target, replacing an older file.
async fn publish(tmp_path: &Path, target: &Path) -> UploadResult<()> {
    match fs::rename(tmp_path, target).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            fs::remove_file(target).await?;
            fs::rename(tmp_path, target).await?;
            Ok(())
        }
        Err(err) => Err(UploadError::Io(err)),
    }
}

/// Relative paths must stay below the output directory.
fn ensure_relative_path_safe(path: &str) -> UploadResult<()> {
    let invalid = || UploadError::InvalidPath(path.to_string());
    if path.is_empty() || path.len() > MAX_PATH_LEN {
        return Err(invalid());
    }
    if path
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(invalid());
    }
    let all_normal = Path::new(path).components().all(|c| match c {
        Component::Normal(name) => name.len() <= MAX_NAME_LEN,
        _ => false,
    });
    if !all_normal {
        return Err(invalid());
    }
    Ok(())
}

fn ensure_filename_safe(name: &str) -> UploadResult<()> {
    ensure_relative_path_safe(name)?;
    if name.contains('/') {
        return Err(UploadError::InvalidPath(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::completion::ChunkSizeRule;
    use bytes::Bytes;
    use futures::stream;

    fn session(identifier: &str, total_chunks: u64, chunk_size: u64, last: u64) -> UploadSession {
        UploadSession {
            identifier: identifier.into(),
            total_size: (total_chunks - 1) * chunk_size + last,
            total_chunks,
            chunk_size,
            filename: "out.bin".into(),
            relative_path: "nested/dir/out.bin".into(),
        }
    }

    async fn put(store: &ChunkStore, s: &UploadSession, index: u64, bytes: Vec<u8>) {
        let rule = ChunkSizeRule::for_chunk(s, index, 2);
        store
            .store(&s.identifier, index, &rule, stream::iter(vec![Ok(Bytes::from(bytes))]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn concatenates_in_numeric_order_past_single_digits() {
        let chunks = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(chunks.path());
        let assembler = Assembler::new(store.clone(), out.path());
        let s = session("twelve", 12, 4, 3);

        let mut expected = Vec::new();
        for index in 1..=12u64 {
            let len = if index == 12 { 3 } else { 4 };
            expected.extend(std::iter::repeat_n(index as u8, len));
        }
        for index in (1..=12u64).rev() {
            let len = if index == 12 { 3 } else { 4 };
            put(&store, &s, index, vec![index as u8; len]).await;
        }

        let file = assembler.assemble(&s).await.unwrap();
        assert_eq!(file.path, out.path().join("nested/dir/out.bin"));
        assert_eq!(file.size_bytes, expected.len() as u64);
        assert_eq!(file.etag, format!("{:x}", md5::compute(&expected)));
        assert_eq!(std::fs::read(&file.path).unwrap(), expected);
        assert_eq!(std::fs::read_dir(chunks.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn filenames_up_to_the_name_limit_assemble() {
        let chunks = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(chunks.path());
        let assembler = Assembler::new(store.clone(), out.path());
        let mut s = session("long-name", 1, 4, 4);
        s.filename = format!("{}.bin", "n".repeat(236));
        s.relative_path = s.filename.clone();
        assert_eq!(s.filename.len(), 240);

        put(&store, &s, 1, vec![7; 4]).await;
        let file = assembler.assemble(&s).await.unwrap();
        assert_eq!(file.path, out.path().join(&s.filename));
        assert_eq!(std::fs::read(&file.path).unwrap(), vec![7; 4]);

        s.filename = "n".repeat(256);
        s.relative_path = s.filename.clone();
        assert!(matches!(assembler.target_path(&s), Err(UploadError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn failed_publish_restores_the_chunks() {
        let chunks = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(chunks.path());
        let assembler = Assembler::new(store.clone(), out.path());
        let s = session("blocked", 2, 4, 2);

        // A non-empty directory squatting on the target name cannot be replaced.
        let squatter = out.path().join("nested/dir/out.bin");
        std::fs::create_dir_all(&squatter).unwrap();
        std::fs::write(squatter.join("keep"), b"x").unwrap();

        put(&store, &s, 1, vec![1; 4]).await;
        put(&store, &s, 2, vec![2; 2]).await;
        assert!(assembler.assemble(&s).await.is_err());

        let indices: Vec<u64> = store.list_indices("blocked").await.unwrap().into_iter().collect();
        assert_eq!(indices, vec![1, 2]);
        assert!(store.retired_dirs().await.unwrap().is_empty());
        assert_eq!(std::fs::read_dir(out.path().join("nested/dir")).unwrap().count(), 1);

        std::fs::remove_dir_all(&squatter).unwrap();
        let file = assembler.assemble(&s).await.unwrap();
        assert_eq!(std::fs::read(file.path).unwrap(), vec![1, 1, 1, 1, 2, 2]);
    }

    #[tokio::test]
    async fn prepare_creates_only_the_output_dir() {
        let base = tempfile::tempdir().unwrap();
        let chunk_root = base.path().join("chunks");
        let output = base.path().join("uploads");
        let assembler = Assembler::new(ChunkStore::new(&chunk_root), &output);

        assert!(assembler.prepare().await.unwrap());
        assert!(!assembler.prepare().await.unwrap());
        assert!(output.is_dir());
        assert!(!chunk_root.exists());
    }

    #[tokio::test]
    async fn failed_assembly_publishes_nothing_and_keeps_chunks() {
        let chunks = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(chunks.path());
        let assembler = Assembler::new(store.clone(), out.path());
        let s = session("gap", 3, 4, 4);

        put(&store, &s, 1, vec![1; 4]).await;
        put(&store, &s, 3, vec![3; 4]).await;

        assert!(matches!(assembler.assemble(&s).await, Err(UploadError::Io(_))));

        let target_dir = out.path().join("nested/dir");
        assert_eq!(std::fs::read_dir(&target_dir).unwrap().count(), 0);
        assert_eq!(
            store.list_indices("gap").await.unwrap().into_iter().collect::<Vec<_>>(),
            vec![1, 3]
        );

        put(&store, &s, 2, vec![2; 4]).await;
        let file = assembler.assemble(&s).await.unwrap();
        assert_eq!(std::fs::read(file.path).unwrap().len(), 12);
    }

    #[test]
    fn target_paths_cannot_escape_the_output_dir() {
        let assembler = Assembler::new(ChunkStore::new("/chunks"), "/out");
        let mut s = session("x", 1, 1, 1);

        s.relative_path = "photos/2025/a.jpg".into();
        s.filename = "a.jpg".into();
        assert_eq!(
            assembler.target_path(&s).unwrap(),
            PathBuf::from("/out/photos/2025/a.jpg")
        );

        for bad in ["../a.jpg", "/etc/passwd", "a/../../b", "a\\b", "./a"] {
            s.relative_path = bad.into();
            assert!(assembler.target_path(&s).is_err(), "accepted {bad:?}");
        }

        s.relative_path = "a.jpg".into();
        for bad in ["..", "x/y", ""] {
            s.filename = bad.into();
            assert!(assembler.target_path(&s).is_err(), "accepted filename {bad:?}");
        }
    }
}
