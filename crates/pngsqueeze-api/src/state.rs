//! Shared handler state.

use pngsqueeze_telemetry::Metrics;

use crate::pipeline::RequestPipeline;

/// State handed to every handler through `axum::extract::State`.
pub(crate) struct ApiState {
    pub(crate) pipeline: RequestPipeline,
    pub(crate) telemetry: Metrics,
}

impl ApiState {
    pub(crate) const fn new(pipeline: RequestPipeline, telemetry: Metrics) -> Self {
        Self {
            pipeline,
            telemetry,
        }
    }
}
