//! Structured, correlation-aware request logging.
//!
//! [`RequestLogger`] produces one [`LogRecord`] per request lifecycle phase,
//! automatically carrying the service identifier and the correlation
//! identifiers from the current [`CorrelationContext`]. Records are emitted
//! through a [`LogSink`] capability; the default sink writes one JSON line
//! per record to stdout. Emission is infallible: log calls are never a
//! source of crashes, in or out of request context.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::Extensions,
    middleware::Next,
    response::Response,
};
use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::response::observe_response;
use crate::trace::CorrelationContext;

/// Severity of one log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Diagnostic detail (request start events).
    Debug,
    /// Normal operation.
    Info,
    /// Client-side failures (4xx completions).
    Warn,
    /// Server-side failures (5xx completions).
    Error,
}

impl Level {
    /// Severity rule for request completion events: 5xx → error,
    /// 4xx → warn, everything else → info.
    pub fn for_status(status: u16) -> Level {
        if status >= 500 {
            Level::Error
        } else if status >= 400 {
            Level::Warn
        } else {
            Level::Info
        }
    }
}

/// One structured log event.
///
/// Serializes to the external record shape exactly: optional fields are
/// omitted when absent, never substituted with placeholders.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    /// Event time, RFC3339.
    pub timestamp: String,
    /// Severity.
    pub level: Level,
    /// Human-readable message.
    pub message: String,
    /// Service identifier.
    pub service: String,
    /// Trace identifier from the request context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Request identifier from the request context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// HTTP method, on request lifecycle events.
    #[serde(rename = "http.method", skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    /// Request path, on request lifecycle events.
    #[serde(rename = "http.path", skip_serializing_if = "Option::is_none")]
    pub http_path: Option<String>,
    /// Final status code, on completion events.
    #[serde(rename = "http.status", skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Elapsed milliseconds (rounded down), on completion events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Capability consuming structured log events, one severity per event.
pub trait LogSink: Send + Sync {
    /// Delivers one record to the backing sink.
    fn emit(&self, record: &LogRecord);
}

/// Default sink: one serde-JSON line per record on stdout.
#[derive(Debug, Default)]
pub struct StdoutJsonSink;

impl LogSink for StdoutJsonSink {
    fn emit(&self, record: &LogRecord) {
        if let Ok(line) = serde_json::to_string(record) {
            println!("{line}");
        }
    }
}

static FALLBACK_LOGGER: Lazy<RequestLogger> =
    Lazy::new(|| RequestLogger::new(env!("CARGO_PKG_NAME")));

/// Correlated logger for one service, optionally bound to one request's
/// correlation context.
#[derive(Clone)]
pub struct RequestLogger {
    service: String,
    sink: Arc<dyn LogSink>,
    correlation: Option<CorrelationContext>,
}

impl RequestLogger {
    /// Creates a base logger for the given service, emitting JSON lines to
    /// stdout.
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_sink(service, Arc::new(StdoutJsonSink))
    }

    /// Creates a base logger emitting through the given sink.
    pub fn with_sink(service: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            service: service.into(),
            sink,
            correlation: None,
        }
    }

    /// Derives a logger bound to one request's correlation identifiers.
    pub fn with_context(&self, context: &CorrelationContext) -> Self {
        Self {
            service: self.service.clone(),
            sink: self.sink.clone(),
            correlation: Some(context.clone()),
        }
    }

    /// Retrieves the logger attached to a request's extensions, falling back
    /// to a freshly constructed base logger when called outside request
    /// processing.
    pub fn from_extensions(extensions: &Extensions) -> RequestLogger {
        extensions
            .get::<RequestLogger>()
            .cloned()
            .unwrap_or_else(|| FALLBACK_LOGGER.clone())
    }

    /// The service identifier this logger reports.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Emits a free-form event at the given severity.
    pub fn event(&self, level: Level, message: impl Into<String>) {
        self.sink.emit(&self.record(level, message.into()));
    }

    /// Emits the request start event.
    pub fn request_started(&self, method: &str, path: &str) {
        let mut record = self.record(Level::Debug, "request started".to_string());
        record.http_method = Some(method.to_string());
        record.http_path = Some(path.to_string());
        self.sink.emit(&record);
    }

    /// Emits the request completion event, with severity chosen by status
    /// class and the elapsed duration in whole milliseconds.
    pub fn request_completed(&self, method: &str, path: &str, status: u16, elapsed: Duration) {
        let mut record = self.record(Level::for_status(status), "request completed".to_string());
        record.http_method = Some(method.to_string());
        record.http_path = Some(path.to_string());
        record.http_status = Some(status);
        record.duration_ms = Some(elapsed.as_millis() as u64);
        self.sink.emit(&record);
    }

    fn record(&self, level: Level, message: String) -> LogRecord {
        LogRecord {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            message,
            service: self.service.clone(),
            trace_id: self.correlation.as_ref().map(|c| c.trace_id.clone()),
            request_id: self.correlation.as_ref().map(|c| c.request_id.clone()),
            http_method: None,
            http_path: None,
            http_status: None,
            duration_ms: None,
        }
    }
}

/// Middleware emitting one start and one completion event per request.
///
/// Derives the per-request logger from the correlation extension and
/// attaches it to the request so handlers can retrieve it with
/// [`RequestLogger::from_extensions`].
pub async fn log_requests(
    State(base): State<RequestLogger>,
    mut req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();

    let logger = match CorrelationContext::from_extensions(req.extensions()) {
        Some(context) => base.with_context(context),
        None => base.clone(),
    };
    logger.request_started(&method, &path);
    req.extensions_mut().insert(logger.clone());

    let response = next.run(req).await;

    let outcome = observe_response(&response);
    logger.request_completed(&method, &path, outcome.status_code, started.elapsed());

    response
}
