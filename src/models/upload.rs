//! Chunk request parameters, as decoded from a form or query string, and the
//! session they declare.

use crate::services::error::{UploadError, UploadResult};
use serde::{Deserialize, Serialize};

/// Undecoded request parameters. Every field is optional here so that a missing
/// value surfaces as a validation error naming the field rather than as a
/// generic extractor rejection.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawChunkParams {
    #[serde(rename = "flowChunkNumber", alias = "chunkNumber")]
    pub chunk_number: Option<String>,
    #[serde(rename = "flowTotalChunks", alias = "totalChunks")]
    pub total_chunks: Option<String>,
    #[serde(rename = "flowChunkSize", alias = "chunkSize")]
    pub chunk_size: Option<String>,
    #[serde(rename = "flowTotalSize", alias = "totalSize")]
    pub total_size: Option<String>,
    #[serde(rename = "flowIdentifier", alias = "identifier")]
    pub identifier: Option<String>,
    #[serde(rename = "flowFilename", alias = "filename")]
    pub filename: Option<String>,
    #[serde(rename = "flowRelativePath", alias = "relativePath")]
    pub relative_path: Option<String>,
}

impl RawChunkParams {
    /// Assign a multipart text field by name. Returns false for unknown names.
    pub fn set(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "flowChunkNumber" | "chunkNumber" => &mut self.chunk_number,
            "flowTotalChunks" | "totalChunks" => &mut self.total_chunks,
            "flowChunkSize" | "chunkSize" => &mut self.chunk_size,
            "flowTotalSize" | "totalSize" => &mut self.total_size,
            "flowIdentifier" | "identifier" => &mut self.identifier,
            "flowFilename" | "filename" => &mut self.filename,
            "flowRelativePath" | "relativePath" => &mut self.relative_path,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

/// A client-declared upload, as carried by every chunk request.
///
/// The declared sizes are trusted as given: `total_size` is the completion
/// target and `chunk_size` the length every non-final chunk must have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSession {
    pub identifier: String,
    pub total_size: u64,
    pub total_chunks: u64,
    pub chunk_size: u64,
    pub filename: String,
    pub relative_path: String,
}

impl UploadSession {
    pub fn is_final_chunk(&self, index: u64) -> bool {
        index == self.total_chunks
    }
}

/// A validated chunk request: one 1-based index within a declared session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkRequest {
    pub chunk_number: u64,
    pub session: UploadSession,
}

impl TryFrom<RawChunkParams> for ChunkRequest {
    type Error = UploadError;

    fn try_from(raw: RawChunkParams) -> UploadResult<Self> {
        let chunk_number = positive("flowChunkNumber", raw.chunk_number)?;
        let total_chunks = positive("flowTotalChunks", raw.total_chunks)?;
        let chunk_size = positive("flowChunkSize", raw.chunk_size)?;
        let total_size = positive("flowTotalSize", raw.total_size)?;
        let identifier = non_empty("flowIdentifier", raw.identifier)?;
        let filename = non_empty("flowFilename", raw.filename)?;
        let relative_path = non_empty("flowRelativePath", raw.relative_path)?;

        if chunk_number > total_chunks {
            return Err(UploadError::validation(
                "flowChunkNumber",
                format!("{chunk_number} is beyond the declared {total_chunks} chunks"),
            ));
        }

        Ok(Self {
            chunk_number,
            session: UploadSession {
                identifier,
                total_size,
                total_chunks,
                chunk_size,
                filename,
                relative_path,
            },
        })
    }
}

fn positive(field: &'static str, value: Option<String>) -> UploadResult<u64> {
    let value = value.ok_or_else(|| UploadError::validation(field, "missing"))?;
    let parsed = value
        .trim()
        .parse::<u64>()
        .map_err(|_| UploadError::validation(field, format!("`{value}` is not an integer")))?;
    if parsed == 0 {
        return Err(UploadError::validation(field, "must be positive"));
    }
    Ok(parsed)
}

fn non_empty(field: &'static str, value: Option<String>) -> UploadResult<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(UploadError::validation(field, "missing")),
    }
}
