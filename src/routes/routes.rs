//! Defines routes for the chunked upload service.
//!
//! ## Structure
//! - `GET  /healthz` -> liveness
//! - `GET  /readyz`  -> readiness (cached chunk-root probe, output directory)
//! - `POST /upload`  -> upload one chunk (multipart form with a `file` field)
//! - `GET  /upload`  -> chunk status query (same parameters, as a query string)

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{chunk_status, upload_chunk},
    },
    services::upload_service::UploadService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::get,
};

/// Build and return the router for all upload routes.
///
/// `max_request_bytes` bounds a single chunk request, multipart overhead included.
pub fn routes(max_request_bytes: usize) -> Router<UploadService> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/upload", get(chunk_status).post(upload_chunk))
        .layer(DefaultBodyLimit::max(max_request_bytes))
}
