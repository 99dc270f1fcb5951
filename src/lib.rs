//! Zola Observe - Unified observability stack for HTTP services
//!
//! Per-request instrumentation for axum services: correlation identifier
//! propagation, request metrics with bounded label cardinality, correlated
//! structured logging, and dependency health aggregated into liveness and
//! readiness signals.
//!
//! The pieces compose around a [`Stack`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use zola_observe::{ObservabilityConfig, Probe, Stack};
//!
//! # async fn run() -> zola_observe::Result<()> {
//! let config = ObservabilityConfig::new("example-service");
//! zola_observe::init(&config)?;
//!
//! let mut stack = Stack::new(config)?;
//! stack.register_probe(Probe::new("database", || async {
//!     Ok::<(), std::convert::Infallible>(())
//! }))?;
//! let stack = Arc::new(stack);
//!
//! let app = axum::Router::new(); // application routes
//! let app = stack.instrument(app).merge(stack.routes());
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

// Strict linting configuration
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(unused_imports)]
#![warn(unused_variables)]
#![warn(dead_code)]

/// Configuration structures and validation
pub mod config;
/// Error types and error handling utilities
pub mod error;
/// Readiness probes, aggregation, and liveness
pub mod health;
/// Correlated structured logging
pub mod logging;
/// Request metrics and Prometheus exposition
pub mod metrics;
/// Exactly-once response status capture
pub mod response;
/// Stack aggregate, endpoints, and router glue
pub mod server;
/// Correlation context propagation
pub mod trace;

// Re-export the types most integrations touch.
pub use config::ObservabilityConfig;
pub use error::{Error, Result};
pub use health::{
    liveness_verdict, HttpProbeOptions, Probe, ProbeResult, ProbeStatus, ReadinessAggregator,
    ReadinessVerdict,
};
pub use logging::{log_requests, Level, LogRecord, LogSink, RequestLogger, StdoutJsonSink};
pub use metrics::{status_class, track_requests, HttpMetrics, RequestTimer};
pub use response::{observe_response, BufferedSink, ResponseObserver, ResponseOutcome, ResponseSink};
pub use server::Stack;
pub use trace::{propagate_context, CorrelationContext, REQUEST_ID_HEADER, TRACE_ID_HEADER};

/// The current version of the crate, sourced from `Cargo.toml` at compile
/// time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Installs the global tracing subscriber used for the crate's own
/// diagnostic logging (JSON format, filtered by the configured directive).
///
/// Call once at application startup, before building the [`Stack`]. Uses
/// `try_init` so a subscriber already installed (e.g. in tests) surfaces as
/// an [`Error::Init`] instead of a panic.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_new(&config.log_filter).map_err(|e| {
        Error::config(format!(
            "invalid log filter '{}': {e}",
            config.log_filter
        ))
    })?;

    fmt()
        .with_env_filter(filter)
        .json()
        .try_init()
        .map_err(|e| Error::init(format!("failed to install tracing subscriber: {e}")))?;

    tracing::info!(version = VERSION, service = %config.service_name, "observability initialized");
    Ok(())
}
