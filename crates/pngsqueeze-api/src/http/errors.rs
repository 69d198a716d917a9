//! RFC9457-style problem responses.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use pngsqueeze_core::{CompressionFailure, FailureKind, Violation};
use serde::Serialize;

use crate::http::constants::{PROBLEM_BASE, PROBLEM_INTERNAL};

/// Problem document body.
#[derive(Debug, Serialize)]
pub(crate) struct ProblemDetails {
    #[serde(rename = "type")]
    pub(crate) problem_type: String,
    pub(crate) title: &'static str,
    pub(crate) status: u16,
    pub(crate) kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) constraint: Option<&'static str>,
}

/// Structured API error rendered as a problem document.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) kind: &'static str,
    title: &'static str,
    detail: Option<String>,
    constraint: Option<&'static str>,
    retry_after: Option<Duration>,
}

impl ApiError {
    const fn new(status: StatusCode, kind: &'static str, title: &'static str) -> Self {
        Self {
            status,
            kind,
            title,
            detail: None,
            constraint: None,
            retry_after: None,
        }
    }

    pub(crate) fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub(crate) fn internal(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            PROBLEM_INTERNAL,
            "internal server error",
        )
        .with_detail(detail)
    }

    pub(crate) fn violation(violation: Violation) -> Self {
        CompressionFailure::validation(violation).into()
    }

    /// Classify an extractor failure. A body cut off by the transport cap is an
    /// oversized upload against `limit`; anything else is a malformed body.
    pub(crate) fn rejected(status: StatusCode, detail: String, limit: u64) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            Self::violation(Violation::BodyTooLarge { limit })
        } else {
            Self::violation(Violation::MalformedBody { detail })
        }
    }
}

impl From<CompressionFailure> for ApiError {
    fn from(failure: CompressionFailure) -> Self {
        let kind = failure.kind();
        let (status, title) = match kind {
            FailureKind::Validation => (StatusCode::BAD_REQUEST, "invalid upload"),
            FailureKind::QualityNotMet => {
                (StatusCode::UNPROCESSABLE_ENTITY, "quality target not met")
            }
            FailureKind::InputRejected => {
                (StatusCode::UNPROCESSABLE_ENTITY, "image rejected by compressor")
            }
            FailureKind::Resource => {
                (StatusCode::INTERNAL_SERVER_ERROR, "temporary storage failure")
            }
            FailureKind::ToolUnavailable => (StatusCode::INTERNAL_SERVER_ERROR, "compressor unavailable"),
            FailureKind::ToolContract => {
                (StatusCode::INTERNAL_SERVER_ERROR, "compressor produced no output")
            }
            FailureKind::Compression => (StatusCode::INTERNAL_SERVER_ERROR, "compression failed"),
            FailureKind::Overload => (StatusCode::SERVICE_UNAVAILABLE, "compression capacity exhausted"),
            FailureKind::Timeout => (StatusCode::GATEWAY_TIMEOUT, "compression timed out"),
        };
        let mut error = Self::new(status, kind.as_str(), title).with_detail(failure.detail());
        match &failure {
            CompressionFailure::Validation { violation } => {
                error.constraint = Some(violation.constraint());
            }
            CompressionFailure::Overload { retry_after, .. } => {
                error.retry_after = Some(*retry_after);
            }
            _ => {}
        }
        error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ProblemDetails {
            problem_type: format!("{PROBLEM_BASE}{}", self.kind),
            title: self.title,
            status: self.status.as_u16(),
            kind: self.kind,
            detail: self.detail,
            constraint: self.constraint,
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after {
            let seconds = retry_after.as_secs_f64().ceil().max(1.0);
            if let Ok(value) = HeaderValue::from_str(&format!("{seconds:.0}")) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}
