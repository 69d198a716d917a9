//! Health and metrics endpoints.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use pngsqueeze_core::CompressionFailure;
use pngsqueeze_telemetry::{MetricsSnapshot, build_sha};
use serde::Serialize;
use tracing::{error, warn};

use crate::http::constants::METRICS_CONTENT_TYPE;
use crate::http::errors::ApiError;
use crate::state::ApiState;

#[derive(Serialize)]
pub(crate) struct CompressorHealth {
    pub(crate) path: String,
    pub(crate) version: String,
}

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) build: &'static str,
    pub(crate) degraded: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) compressor: Option<CompressorHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) reason: Option<&'static str>,
    pub(crate) jobs: MetricsSnapshot,
}

/// `GET /health`: 200 while the compressor binary is present and executable, 503 otherwise.
pub(crate) async fn health(State(state): State<Arc<ApiState>>) -> Response {
    let jobs = state.telemetry.snapshot();
    match state.pipeline.availability() {
        Ok(tool) => Json(HealthResponse {
            status: "ok",
            build: build_sha(),
            degraded: Vec::new(),
            compressor: Some(CompressorHealth {
                path: tool.path.display().to_string(),
                version: tool.version,
            }),
            reason: None,
            jobs,
        })
        .into_response(),
        Err(failure) => {
            let reason = match &failure {
                CompressionFailure::ToolUnavailable { reason, .. } => *reason,
                _ => "unknown",
            };
            warn!(kind = failure.kind().as_str(), reason, "health check found compressor unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    build: build_sha(),
                    degraded: vec!["compressor"],
                    compressor: None,
                    reason: Some(reason),
                    jobs,
                }),
            )
                .into_response()
        }
    }
}

/// `GET /metrics`: Prometheus text exposition.
pub(crate) async fn metrics(State(state): State<Arc<ApiState>>) -> Result<Response, ApiError> {
    match state.telemetry.render() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, METRICS_CONTENT_TYPE)
            .body(Body::from(body))
            .map_err(|err| {
                error!(error = %err, "failed to build metrics response");
                ApiError::internal("failed to build metrics response")
            }),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            Err(ApiError::internal("failed to render metrics"))
        }
    }
}
