//! HTTP handlers for chunk uploads and chunk status queries.
//! Decodes the request parameters, validates them before any storage is
//! touched, and delegates to `UploadService`.

use crate::{
    errors::AppError,
    models::{
        chunk::{AssembledFile, ChunkStatus},
        upload::{ChunkRequest, RawChunkParams},
    },
    services::{error::UploadError, upload_service::UploadService},
};
use axum::{
    Json,
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use serde::Serialize;
use std::io;
use tracing::debug;

/// Name of the multipart field carrying the chunk payload.
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<AssembledFile>,
}

/// `POST /upload`: store one chunk.
///
/// The flow parameters must precede the `file` field, which is streamed to
/// storage as it arrives so an oversized payload is cut off early. Responds
/// `{"complete": false}` while the session is incomplete, and with the
/// assembled file once this chunk completes it.
pub async fn upload_chunk(
    State(service): State<UploadService>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut params = RawChunkParams::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("Failed to read multipart field: {err}")))?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        if name == FILE_FIELD {
            let request = ChunkRequest::try_from(std::mem::take(&mut params))?;
            debug!(
                "chunk {}:{} arrived",
                request.session.identifier, request.chunk_number
            );
            let body = field.map_err(io::Error::other);
            let file = service.upload_chunk(&request, body).await?;
            return Ok(Json(UploadResponse {
                complete: file.is_some(),
                file,
            }));
        }

        let value = field
            .text()
            .await
            .map_err(|err| AppError::bad_request(format!("Failed to read field {name}: {err}")))?;
        if !params.set(&name, value) {
            debug!("ignoring unknown upload field {}", name);
        }
    }

    ChunkRequest::try_from(params)?;
    Err(UploadError::validation(FILE_FIELD, "missing").into())
}

/// `GET /upload`: does the server already hold this chunk?
///
/// 200 when present and valid, 404 when not received, 500 when present with a
/// bad size or when the chunk root is unusable. The body is a short message.
pub async fn chunk_status(
    State(service): State<UploadService>,
    Query(params): Query<RawChunkParams>,
) -> Result<Response, AppError> {
    let request = ChunkRequest::try_from(params)?;
    let (message, status) = service.chunk_status(&request).await?;
    Ok((status_code(status), message).into_response())
}

pub fn status_code(status: ChunkStatus) -> StatusCode {
    match status {
        ChunkStatus::Ok => StatusCode::OK,
        ChunkStatus::NotStarted => StatusCode::NOT_FOUND,
        ChunkStatus::Corrupt | ChunkStatus::Unavailable => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
