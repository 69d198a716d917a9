//! Request identity and span context.
//!
//! # Design
//! - Every request carries an `x-request-id`, generated when the client sends none.
//! - The id and matched route live in task-local storage so job logs emitted deep in
//!   the pipeline can be correlated with the request that caused them.

use std::future::Future;
use std::sync::Arc;

use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{Span, span::Entered};

use crate::init::build_sha;

/// Header carrying the request identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Layer that assigns a UUID `x-request-id` to requests lacking one.
#[must_use]
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

/// Layer that echoes the request's `x-request-id` on the response.
#[must_use]
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

/// Keeps the service-level span entered for the lifetime of the process.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter a `service` span tagged with the service name and build SHA.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        let service = service.into();
        let span: &'static Span = Box::leak(Box::new(tracing::info_span!(
            "service",
            name = %service,
            build_sha = %build_sha()
        )));
        Self {
            _guard: span.enter(),
        }
    }
}

/// Record request id and route on a request span declared with empty fields.
pub fn set_request_context(span: &Span, request_id: &str, route: &str) {
    span.record("request_id", tracing::field::display(request_id));
    span.record("route", tracing::field::display(route));
}

/// Request identifier of the task currently handling a request, if any.
#[must_use]
pub fn current_request_id() -> Option<String> {
    ACTIVE_REQUEST
        .try_with(|ctx| ctx.request_id.as_ref().to_string())
        .ok()
}

/// Run `fut` with the given request identity available through [`current_request_id`].
pub async fn with_request_context<Fut, T>(request_id: impl Into<String>, fut: Fut) -> T
where
    Fut: Future<Output = T>,
{
    let context = RequestContext {
        request_id: Arc::from(request_id.into()),
    };
    ACTIVE_REQUEST.scope(context, fut).await
}

#[derive(Clone)]
struct RequestContext {
    request_id: Arc<str>,
}

tokio::task_local! {
    static ACTIVE_REQUEST: RequestContext;
}
