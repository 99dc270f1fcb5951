//! Stack aggregate, observability endpoints, and router glue.
//!
//! [`Stack`] bundles the correlated logger, the metric recorder, and the
//! readiness aggregator for one service. [`Stack::routes`] serves
//! `/healthz`, `/readyz`, and the metrics path; [`Stack::instrument`] layers
//! the per-request interceptor chain onto an application router in the
//! canonical order (correlation first, then metrics, then logging).
//!
//! The bundled handlers assemble their responses through a
//! [`ResponseObserver`], the same decorator the middleware reads at the
//! outbound boundary.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::info;

use crate::config::ObservabilityConfig;
use crate::error::Result;
use crate::health::{liveness_verdict, Probe, ReadinessAggregator, ReadinessVerdict};
use crate::logging::{log_requests, LogSink, RequestLogger};
use crate::metrics::{track_requests, HttpMetrics};
use crate::response::{BufferedSink, ResponseObserver};
use crate::trace::propagate_context;

/// Observability components for one service.
///
/// Build it, register probes, wrap it in an [`Arc`], then attach
/// [`routes`](Stack::routes) and [`instrument`](Stack::instrument) to the
/// application router.
pub struct Stack {
    config: ObservabilityConfig,
    logger: RequestLogger,
    metrics: Arc<HttpMetrics>,
    readiness: ReadinessAggregator,
}

impl Stack {
    /// Creates a stack from the given configuration. Configuration problems
    /// are fatal here, before any traffic is served.
    pub fn new(config: ObservabilityConfig) -> Result<Self> {
        config.validate()?;
        let logger = RequestLogger::new(config.service_name.clone());
        let metrics = Arc::new(HttpMetrics::new(
            config.metrics_namespace(),
            config.metrics_path.clone(),
        ));
        let readiness = ReadinessAggregator::new(config.readiness_timeout);
        Ok(Self {
            config,
            logger,
            metrics,
            readiness,
        })
    }

    /// Like [`Stack::new`], but emitting log records through the given sink
    /// instead of stdout.
    pub fn with_sink(config: ObservabilityConfig, sink: Arc<dyn LogSink>) -> Result<Self> {
        let mut stack = Self::new(config)?;
        stack.logger = RequestLogger::with_sink(stack.config.service_name.clone(), sink);
        Ok(stack)
    }

    /// Registers a readiness probe. Must happen before the stack is shared.
    pub fn register_probe(&mut self, probe: Probe) -> Result<()> {
        self.readiness.register(probe)
    }

    /// The base correlated logger for this service.
    pub fn logger(&self) -> &RequestLogger {
        &self.logger
    }

    /// The metric recorder for this service.
    pub fn metrics(&self) -> &Arc<HttpMetrics> {
        &self.metrics
    }

    /// The stack's configuration.
    pub fn config(&self) -> &ObservabilityConfig {
        &self.config
    }

    /// Router serving the liveness, readiness, and metrics endpoints.
    pub fn routes(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/readyz", get(readyz))
            .route(self.config.metrics_path.as_str(), get(render_metrics))
            .with_state(self.clone())
    }

    /// Layers the instrumentation chain onto an application router.
    ///
    /// Correlation propagation runs outermost so every downstream
    /// interceptor sees the resolved identifiers, then metrics, then
    /// request logging.
    ///
    /// Installs a plain 404 fallback on the router first: the default
    /// fallback sits outside layered middleware, and requests that match no
    /// route must still be counted and carry correlation headers. Replaces
    /// any fallback already set on `router`.
    pub fn instrument(self: &Arc<Self>, router: Router) -> Router {
        router
            .fallback(unmatched)
            .layer(from_fn_with_state(self.logger.clone(), log_requests))
            .layer(from_fn_with_state(self.metrics.clone(), track_requests))
            .layer(from_fn(propagate_context))
    }

    /// Serves the observability routes on their own listener, for
    /// deployments that keep probe/scrape traffic off the application port.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "observability server listening");
        axum::serve(listener, self.routes()).await?;
        Ok(())
    }
}

/// Fallback for requests matching no route. An explicit handler, so the
/// instrumentation layers wrap unmatched traffic too.
async fn unmatched() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Liveness handler: unconditional success, independent of probe state.
async fn healthz() -> Response {
    json_response(&liveness_verdict(), None)
}

/// Readiness handler: evaluates every registered probe under the shared
/// deadline and maps the verdict to 200 or 503.
async fn readyz(State(stack): State<Arc<Stack>>) -> Response {
    let verdict = stack.readiness.evaluate().await;
    let status = if verdict.all_ok() {
        None
    } else {
        Some(StatusCode::SERVICE_UNAVAILABLE)
    };
    json_response(&verdict, status)
}

/// Metrics handler: Prometheus text exposition. Its own traffic is excluded
/// from the series it exposes.
async fn render_metrics(State(stack): State<Arc<Stack>>) -> Response {
    let mut observer = ResponseObserver::new(BufferedSink::default());
    // Body first: the observer fixes the implicit 200.
    observer.write_body(stack.metrics.render().as_bytes());
    build_response(observer, "text/plain; version=0.0.4; charset=utf-8")
}

fn json_response(verdict: &ReadinessVerdict, status: Option<StatusCode>) -> Response {
    let mut observer = ResponseObserver::new(BufferedSink::default());
    if let Some(status) = status {
        observer.set_status(status.as_u16());
    }
    observer.write_body(&serde_json::to_vec(verdict).unwrap_or_default());
    build_response(observer, "application/json")
}

fn build_response(observer: ResponseObserver<BufferedSink>, content_type: &str) -> Response {
    let outcome = observer.outcome();
    let body = observer.into_inner().into_body();
    Response::builder()
        .status(outcome.status_code)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_stack() -> Arc<Stack> {
        let mut config = ObservabilityConfig::new("test-service");
        config.readiness_timeout = Duration::from_millis(250);
        Arc::new(Stack::new(config).unwrap())
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        assert!(Stack::new(ObservabilityConfig::new("")).is_err());
    }

    #[test]
    fn test_probe_registration_surfaces_config_errors() {
        let mut config = ObservabilityConfig::new("svc");
        config.readiness_timeout = Duration::from_millis(250);
        let mut stack = Stack::new(config).unwrap();
        stack
            .register_probe(Probe::new("db", || async {
                Ok::<(), std::convert::Infallible>(())
            }))
            .unwrap();
        assert!(stack
            .register_probe(Probe::new("db", || async {
                Ok::<(), std::convert::Infallible>(())
            }))
            .is_err());
    }

    #[tokio::test]
    async fn test_handlers_build_well_formed_responses() {
        let stack = test_stack();

        let live = healthz().await;
        assert_eq!(live.status(), StatusCode::OK);

        let ready = readyz(State(stack.clone())).await;
        assert_eq!(ready.status(), StatusCode::OK);

        let metrics = render_metrics(State(stack)).await;
        assert_eq!(metrics.status(), StatusCode::OK);
        assert!(metrics
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }
}
