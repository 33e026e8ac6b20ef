//! Stored chunks, their status, and the file they assemble into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single stored chunk of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// 1-based chunk index.
    pub index: u64,

    /// Stored payload length in bytes.
    pub size_bytes: u64,

    /// Where the payload lives under the chunk root.
    pub location: PathBuf,
}

/// Answer to a point query about one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStatus {
    /// Present and correctly sized.
    Ok,
    /// Not received (or already consumed by assembly).
    NotStarted,
    /// Present, not the final chunk, and not the nominal size.
    Corrupt,
    /// The chunk root is unusable.
    Unavailable,
}

/// The published result of a completed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Hex MD5 of the assembled bytes.
    pub etag: String,
    pub assembled_at: DateTime<Utc>,
}
