//! Correlation context propagation for HTTP requests.
//!
//! Every inbound request gets a [`CorrelationContext`] holding two opaque
//! string identifiers, read from the `X-Trace-ID` / `X-Request-ID` headers or
//! freshly generated when absent. The context is attached to the
//! request-scoped extensions for downstream code and echoed back on the
//! response so callers can correlate.

use axum::{
    extract::Request,
    http::{Extensions, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// Inbound/outbound header carrying the trace identifier.
pub const TRACE_ID_HEADER: HeaderName = HeaderName::from_static("x-trace-id");

/// Inbound/outbound header carrying the request identifier.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Correlation identifiers for one logical request.
///
/// Both identifiers are opaque tokens; generation uses UUIDv4 but inbound
/// values are passed through untouched, whatever their shape. The value is
/// immutable for the lifetime of its request. Components needing a different
/// identifier for nested calls derive a new context with
/// [`with_trace_id`](CorrelationContext::with_trace_id) /
/// [`with_request_id`](CorrelationContext::with_request_id) instead of
/// mutating the shared one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    /// Token linking events across service boundaries.
    pub trace_id: String,
    /// Token unique to this inbound request.
    pub request_id: String,
}

impl CorrelationContext {
    /// Creates a context with two freshly generated identifiers.
    pub fn new() -> Self {
        Self {
            trace_id: generate_token(),
            request_id: generate_token(),
        }
    }

    /// Resolves a context from inbound headers, generating a token for each
    /// identifier that is absent, empty, or not representable as a string.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            trace_id: header_token(headers, &TRACE_ID_HEADER).unwrap_or_else(generate_token),
            request_id: header_token(headers, &REQUEST_ID_HEADER).unwrap_or_else(generate_token),
        }
    }

    /// Retrieves the context attached to a request's extensions, if any.
    pub fn from_extensions(extensions: &Extensions) -> Option<&CorrelationContext> {
        extensions.get::<CorrelationContext>()
    }

    /// Derives a new context carrying the given trace identifier.
    pub fn with_trace_id(&self, trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            request_id: self.request_id.clone(),
        }
    }

    /// Derives a new context carrying the given request identifier.
    pub fn with_request_id(&self, request_id: impl Into<String>) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            request_id: request_id.into(),
        }
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Middleware that attaches a [`CorrelationContext`] to the request and
/// echoes both identifiers on the response.
///
/// Runs first in the instrumentation chain so every downstream interceptor
/// and handler sees the resolved identifiers.
pub async fn propagate_context(mut req: Request, next: Next) -> Response {
    let context = CorrelationContext::from_headers(req.headers());
    req.extensions_mut().insert(context.clone());

    let mut response = next.run(req).await;

    // Inbound tokens round-trip verbatim; generated UUIDs are always valid
    // header values.
    if let Ok(value) = HeaderValue::from_str(&context.trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&context.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

fn generate_token() -> String {
    Uuid::new_v4().to_string()
}

fn header_token(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
