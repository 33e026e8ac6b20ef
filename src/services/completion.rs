//! Chunk size rules and session completion.
//!
//! Every non-final chunk must be exactly the nominal chunk size. The final chunk
//! may differ, up to `final_chunk_factor` times the nominal size. A session is
//! complete when every index `1..=total_chunks` is stored and the stored sizes
//! sum to exactly the declared total; a sum above the total is an error.

use super::error::{UploadError, UploadResult};
use crate::models::{chunk::ChunkRecord, upload::UploadSession};

/// Size constraint for one chunk index of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSizeRule {
    pub index: u64,
    pub nominal: u64,
    pub is_final: bool,
    pub final_chunk_factor: u64,
}

impl ChunkSizeRule {
    pub fn for_chunk(session: &UploadSession, index: u64, final_chunk_factor: u64) -> Self {
        Self {
            index,
            nominal: session.chunk_size,
            is_final: session.is_final_chunk(index),
            final_chunk_factor,
        }
    }

    /// Largest admissible length for this index.
    pub fn max_len(&self) -> u64 {
        if self.is_final {
            self.nominal.saturating_mul(self.final_chunk_factor)
        } else {
            self.nominal
        }
    }

    /// Check a partially received payload; fails as soon as it is too long.
    pub fn check_partial(&self, received: u64) -> UploadResult<()> {
        if received <= self.max_len() {
            return Ok(());
        }
        Err(self.mismatch(received))
    }

    /// Check a fully received payload.
    pub fn check(&self, actual: u64) -> UploadResult<()> {
        if self.is_final {
            return self.check_partial(actual);
        }
        if actual != self.nominal {
            return Err(self.mismatch(actual));
        }
        Ok(())
    }

    /// Whether an already stored chunk of `actual` bytes has an acceptable size.
    pub fn accepts(&self, actual: u64) -> bool {
        self.check(actual).is_ok()
    }

    fn mismatch(&self, actual: u64) -> UploadError {
        if self.is_final {
            UploadError::FinalChunkTooLarge {
                index: self.index,
                limit: self.max_len(),
                actual,
            }
        } else {
            UploadError::SizeMismatch {
                index: self.index,
                expected: self.nominal,
                actual,
            }
        }
    }
}

/// Decide whether the stored chunks complete `session`.
///
/// Returns `Ok(false)` while chunks are missing or the sizes fall short, and
/// `SizeOverflow` when the stored bytes exceed the declared total.
pub fn is_complete(session: &UploadSession, stored: &[ChunkRecord]) -> UploadResult<bool> {
    let total: u64 = stored.iter().map(|c| c.size_bytes).sum();
    if total > session.total_size {
        return Err(UploadError::SizeOverflow {
            declared: session.total_size,
            stored: total,
        });
    }
    if total < session.total_size {
        return Ok(false);
    }
    let all_present = (1..=session.total_chunks)
        .all(|index| stored.iter().any(|c| c.index == index));
    Ok(all_present)
}
