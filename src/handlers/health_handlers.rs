//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness from the cached chunk-root probe and the output directory

use crate::services::upload_service::UploadService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;

/// `GET /healthz`
///
/// Very small liveness probe. Always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Reports the chunk root capability probe (run once, then cached).
/// 2. Checks the output directory exists and is a directory.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(service): State<UploadService>) -> impl IntoResponse {
    let chunk_root_check = match service.probe.check().await {
        Ok(()) => (true, None::<String>),
        Err(e) => (false, Some(e.to_string())),
    };

    let output_dir = service.assembler.output_dir();
    let output_check = match fs::metadata(output_dir).await {
        Ok(meta) if meta.is_dir() => (true, None::<String>),
        Ok(_) => (false, Some(format!("{} is not a directory", output_dir.display()))),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    let overall_ok = chunk_root_check.0 && output_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "chunk_root",
        CheckStatus {
            ok: chunk_root_check.0,
            error: chunk_root_check.1,
        },
    );
    checks.insert(
        "output_dir",
        CheckStatus {
            ok: output_check.0,
            error: output_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
