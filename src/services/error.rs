//! Error taxonomy shared by every component of the upload core.

use super::probe::ConfigurationError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    /// The chunk root failed its capability probe. Cached for the process lifetime.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("Bad {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("invalid upload identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("invalid target path `{0}`")]
    InvalidPath(String),
    #[error("chunk {index} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        index: u64,
        expected: u64,
        actual: u64,
    },
    #[error("final chunk {index} exceeds {limit} bytes (got at least {actual})")]
    FinalChunkTooLarge { index: u64, limit: u64, actual: u64 },
    #[error("stored chunks total {stored} bytes, more than the declared {declared}")]
    SizeOverflow { declared: u64, stored: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

impl UploadError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}
