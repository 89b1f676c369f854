//! Correlation ids, panic containment, and request logging.
//!
//! Layer order, outermost first:
//!
//! 1. `SetRequestIdLayer`: keep an inbound `x-request-id`, else mint a UUID v7
//! 2. `PropagateRequestIdLayer`: copy it onto the response
//! 3. `TraceLayer`: one span per request
//! 4. [`request_context`]: catch handler panics, log completion

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use axum::Router;
use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use futures::FutureExt as _;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::{ApiError, ErrorReply};

/// Correlation header, in and out.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Mints UUID v7 correlation ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::now_v7().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// The correlation id of the current request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    fn lookup(headers: &HeaderMap, extensions: &axum::http::Extensions) -> Self {
        let value = extensions
            .get::<RequestId>()
            .map(RequestId::header_value)
            .or_else(|| headers.get(REQUEST_ID_HEADER));
        match value {
            Some(value) => Self(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            None => Self(Uuid::now_v7().to_string()),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CorrelationId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::lookup(&parts.headers, &parts.extensions))
    }
}

/// Wrap `router` in the correlation, tracing, and panic layers.
pub fn with_request_layers(router: Router) -> Router {
    router
        .layer(middleware::from_fn(request_context))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
        .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuidV7))
}

/// Turn handler panics into a 500 and log every completed request.
pub async fn request_context(request: Request, next: Next) -> Response {
    let CorrelationId(request_id) = CorrelationId::lookup(request.headers(), request.extensions());
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            error!(
                request_id = %request_id,
                %method,
                path,
                panic = %panic_message(&*panic),
                "unhandled server error"
            );
            ErrorReply::new(request_id.clone(), ApiError::internal()).into_response()
        }
    };

    info!(
        request_id = %request_id,
        %method,
        path,
        status_code = response.status().as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        "request completed"
    );
    response
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
}
