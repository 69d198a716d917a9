//! Router construction and server host.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{DefaultBodyLimit, MatchedPath},
    http::{HeaderName, Request},
    routing::{get, post},
};
use pngsqueeze_core::UploadLimits;
use pngsqueeze_telemetry::{Metrics, REQUEST_ID_HEADER, build_sha, set_request_context};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{Span, info};

use crate::error::{ApiServerError, ApiServerResult};
use crate::http::compress::{compress, compress_download};
use crate::http::constants::{
    FRAMING_ALLOWANCE, HEADER_COMPRESSION_RATIO, HEADER_COMPRESSION_STATS,
};
use crate::http::health::{health, metrics};
use crate::http::telemetry::HttpMetricsLayer;
use crate::pipeline::RequestPipeline;
use crate::state::ApiState;

/// Axum router wrapper hosting the compression endpoints.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Build the router around a pipeline.
    ///
    /// Request bodies are capped per route from the pipeline's upload limits: one image
    /// for `/compress`, a full batch for `/compress-download`.
    #[must_use]
    pub fn new(pipeline: RequestPipeline, telemetry: Metrics) -> Self {
        let single_limit = body_limit(pipeline.limits(), 1);
        let batch_limit = body_limit(pipeline.limits(), pipeline.limits().max_batch_files);
        let state = Arc::new(ApiState::new(pipeline, telemetry.clone()));
        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers([
                HeaderName::from_static(HEADER_COMPRESSION_RATIO),
                HeaderName::from_static(HEADER_COMPRESSION_STATS),
            ]);
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let route = request
                    .extensions()
                    .get::<MatchedPath>()
                    .map_or_else(|| request.uri().path(), MatchedPath::as_str);
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("");

                let span = tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    route = tracing::field::Empty,
                    request_id = tracing::field::Empty,
                    build_sha = %build_sha(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                );
                set_request_context(&span, request_id, route);
                span
            })
            .on_request(|_request: &Request<_>, _span: &Span| {})
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    span.record("status_code", response.status().as_u16());
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                    span.record("latency_ms", latency_ms);
                },
            );
        let layered = ServiceBuilder::new()
            .layer(pngsqueeze_telemetry::set_request_id_layer())
            .layer(pngsqueeze_telemetry::propagate_request_id_layer())
            .layer(trace_layer)
            .layer(HttpMetricsLayer::new(telemetry));

        let router = Router::new()
            .route(
                "/compress",
                post(compress).layer(DefaultBodyLimit::max(single_limit)),
            )
            .route(
                "/compress-download",
                post(compress_download).layer(DefaultBodyLimit::max(batch_limit)),
            )
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .route_layer(layered)
            .layer(cors_layer)
            .with_state(state);

        Self { router }
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or the server fails.
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> ApiServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ApiServerError::Bind { addr, source })?;
        info!(addr = %addr, "http listener started");
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|source| ApiServerError::Serve { source })?;
        info!("http listener stopped");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) const fn router(&self) -> &Router {
        &self.router
    }
}

/// Transport cap for a body carrying up to `files` images plus their framing.
fn body_limit(limits: &UploadLimits, files: usize) -> usize {
    let files = u64::try_from(files).unwrap_or(u64::MAX);
    let total = limits
        .max_upload_bytes
        .saturating_add(FRAMING_ALLOWANCE)
        .saturating_mul(files);
    usize::try_from(total).unwrap_or(usize::MAX)
}
