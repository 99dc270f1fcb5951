//! Request metrics with bounded label cardinality.
//!
//! [`HttpMetrics`] accumulates:
//! - `<ns>_http_requests_total{method,path,status}` counter
//! - `<ns>_http_request_duration_seconds{method,path}` histogram
//! - `<ns>_http_requests_in_flight` gauge
//! - `<ns>_errors_total{type}` counter
//!
//! The `path` label is always the matched route template (e.g.
//! `/users/:id`), never the interpolated path, so cardinality stays bounded
//! by the routes the service defines. The `status` label is the status
//! class (leading digit). Recording is synchronous, atomic, and infallible:
//! nothing here can abort the request being served.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use parking_lot::RwLock;

use crate::response::observe_response;

/// Route template used for requests that matched no route. Keeps 404 traffic
/// out of the raw-path namespace.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Histogram bucket upper bounds in seconds (the Prometheus defaults).
const DURATION_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequestKey {
    method: String,
    path: String,
    status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    method: String,
    path: String,
}

/// Fixed-bucket duration histogram with atomic accumulation.
struct Histogram {
    buckets: [AtomicU64; DURATION_BUCKETS.len()],
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
        }
    }

    fn observe(&self, seconds: f64) {
        for (bucket, bound) in self.buckets.iter().zip(DURATION_BUCKETS) {
            if seconds <= bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);
    }

    fn sum_seconds(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}

/// Opaque start marker returned by [`HttpMetrics::begin_request`].
///
/// Consumed by [`HttpMetrics::end_request`], which computes the elapsed
/// duration from it.
#[derive(Debug)]
pub struct RequestTimer {
    started: Instant,
}

impl RequestTimer {
    /// Elapsed time since the request began.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

/// Concurrent registry of request counters, duration histograms, the
/// in-flight gauge, and the error-type counter.
///
/// Series maps are lock-guarded; the values themselves are atomics, so many
/// simultaneous requests can increment and observe with no lost updates.
pub struct HttpMetrics {
    namespace: String,
    metrics_path: String,
    requests_total: RwLock<HashMap<RequestKey, Arc<AtomicU64>>>,
    request_duration: RwLock<HashMap<RouteKey, Arc<Histogram>>>,
    requests_in_flight: AtomicI64,
    errors_total: RwLock<HashMap<String, Arc<AtomicU64>>>,
}

impl HttpMetrics {
    /// Creates a recorder for the given namespace. `metrics_path` is the
    /// path excluded from request instrumentation.
    pub fn new(namespace: impl Into<String>, metrics_path: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            metrics_path: metrics_path.into(),
            requests_total: RwLock::new(HashMap::new()),
            request_duration: RwLock::new(HashMap::new()),
            requests_in_flight: AtomicI64::new(0),
            errors_total: RwLock::new(HashMap::new()),
        }
    }

    /// The path excluded from instrumentation and served by the metrics
    /// handler.
    pub fn metrics_path(&self) -> &str {
        &self.metrics_path
    }

    /// Marks a request as started: increments the in-flight gauge and
    /// returns the start marker for [`end_request`](HttpMetrics::end_request).
    pub fn begin_request(&self) -> RequestTimer {
        self.requests_in_flight.fetch_add(1, Ordering::Relaxed);
        RequestTimer {
            started: Instant::now(),
        }
    }

    /// Finalizes a request: decrements the in-flight gauge, bumps the
    /// request counter for (method, route template, status class) and
    /// records the elapsed duration.
    ///
    /// `route_template` must be the matched pattern, never the raw path.
    pub fn end_request(&self, timer: RequestTimer, method: &str, route_template: &str, status: u16) {
        self.requests_in_flight.fetch_sub(1, Ordering::Relaxed);
        let elapsed = timer.elapsed().as_secs_f64();

        self.counter_for(method, route_template, status_class(status))
            .fetch_add(1, Ordering::Relaxed);
        self.histogram_for(method, route_template).observe(elapsed);
    }

    /// Increments the standalone error counter for the given error type.
    /// Independent of the request lifecycle; callable from anywhere.
    pub fn record_error(&self, error_type: &str) {
        let existing = self.errors_total.read().get(error_type).cloned();
        let counter = match existing {
            Some(counter) => counter,
            None => self
                .errors_total
                .write()
                .entry(error_type.to_string())
                .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                .clone(),
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value of the in-flight gauge.
    pub fn in_flight(&self) -> i64 {
        self.requests_in_flight.load(Ordering::Relaxed)
    }

    /// Current value of the request counter for one label set.
    pub fn request_count(&self, method: &str, route_template: &str, status_class: &str) -> u64 {
        let key = RequestKey {
            method: method.to_string(),
            path: route_template.to_string(),
            status: status_class.to_string(),
        };
        self.requests_total
            .read()
            .get(&key)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Current value of the error counter for one type.
    pub fn error_count(&self, error_type: &str) -> u64 {
        self.errors_total
            .read()
            .get(error_type)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Renders every series in the Prometheus text exposition format, with
    /// deterministic (sorted) line order within each series.
    pub fn render(&self) -> String {
        let ns = &self.namespace;
        let mut out = String::new();

        out.push_str(&format!("# TYPE {ns}_http_requests_total counter\n"));
        let mut lines: Vec<String> = self
            .requests_total
            .read()
            .iter()
            .map(|(key, counter)| {
                format!(
                    "{ns}_http_requests_total{{method=\"{}\",path=\"{}\",status=\"{}\"}} {}\n",
                    key.method,
                    key.path,
                    key.status,
                    counter.load(Ordering::Relaxed)
                )
            })
            .collect();
        lines.sort();
        lines.drain(..).for_each(|line| out.push_str(&line));

        out.push_str(&format!(
            "# TYPE {ns}_http_request_duration_seconds histogram\n"
        ));
        let histograms = self.request_duration.read();
        let mut routes: Vec<&RouteKey> = histograms.keys().collect();
        routes.sort_by(|a, b| (&a.method, &a.path).cmp(&(&b.method, &b.path)));
        for key in routes {
            let histogram = &histograms[key];
            let labels = format!("method=\"{}\",path=\"{}\"", key.method, key.path);
            for (bucket, bound) in histogram.buckets.iter().zip(DURATION_BUCKETS) {
                out.push_str(&format!(
                    "{ns}_http_request_duration_seconds_bucket{{{labels},le=\"{bound}\"}} {}\n",
                    bucket.load(Ordering::Relaxed)
                ));
            }
            let count = histogram.count.load(Ordering::Relaxed);
            out.push_str(&format!(
                "{ns}_http_request_duration_seconds_bucket{{{labels},le=\"+Inf\"}} {count}\n"
            ));
            out.push_str(&format!(
                "{ns}_http_request_duration_seconds_sum{{{labels}}} {}\n",
                histogram.sum_seconds()
            ));
            out.push_str(&format!(
                "{ns}_http_request_duration_seconds_count{{{labels}}} {count}\n"
            ));
        }
        drop(histograms);

        out.push_str(&format!("# TYPE {ns}_http_requests_in_flight gauge\n"));
        out.push_str(&format!(
            "{ns}_http_requests_in_flight {}\n",
            self.in_flight()
        ));

        out.push_str(&format!("# TYPE {ns}_errors_total counter\n"));
        let mut lines: Vec<String> = self
            .errors_total
            .read()
            .iter()
            .map(|(error_type, counter)| {
                format!(
                    "{ns}_errors_total{{type=\"{error_type}\"}} {}\n",
                    counter.load(Ordering::Relaxed)
                )
            })
            .collect();
        lines.sort();
        lines.drain(..).for_each(|line| out.push_str(&line));

        out
    }

    fn counter_for(&self, method: &str, path: &str, status: &str) -> Arc<AtomicU64> {
        let key = RequestKey {
            method: method.to_string(),
            path: path.to_string(),
            status: status.to_string(),
        };
        if let Some(counter) = self.requests_total.read().get(&key) {
            return counter.clone();
        }
        self.requests_total
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    fn histogram_for(&self, method: &str, path: &str) -> Arc<Histogram> {
        let key = RouteKey {
            method: method.to_string(),
            path: path.to_string(),
        };
        if let Some(histogram) = self.request_duration.read().get(&key) {
            return histogram.clone();
        }
        self.request_duration
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(Histogram::new()))
            .clone()
    }
}

/// The leading digit of a status code, formatted for the `status` label.
pub fn status_class(status: u16) -> &'static str {
    match status / 100 {
        1 => "1",
        2 => "2",
        3 => "3",
        4 => "4",
        5 => "5",
        _ => "0",
    }
}

/// Middleware recording request metrics.
///
/// Requests to the metrics path itself bypass recording entirely, so the
/// exported series never instrument their own scrapes.
pub async fn track_requests(
    State(metrics): State<Arc<HttpMetrics>>,
    matched_path: Option<MatchedPath>,
    req: Request,
    next: Next,
) -> Response {
    if req.uri().path() == metrics.metrics_path() {
        return next.run(req).await;
    }

    let method = req.method().as_str().to_string();
    let route = matched_path
        .as_ref()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());

    let timer = metrics.begin_request();
    let response = next.run(req).await;

    let outcome = observe_response(&response);
    metrics.end_request(timer, &method, &route, outcome.status_code);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_class() {
        assert_eq!(status_class(200), "2");
        assert_eq!(status_class(204), "2");
        assert_eq!(status_class(301), "3");
        assert_eq!(status_class(404), "4");
        assert_eq!(status_class(503), "5");
        assert_eq!(status_class(99), "0");
    }

    #[test]
    fn test_request_lifecycle_counts() {
        let metrics = HttpMetrics::new("svc", "/metrics");

        let timer = metrics.begin_request();
        assert_eq!(metrics.in_flight(), 1);
        metrics.end_request(timer, "GET", "/users/:id", 200);

        assert_eq!(metrics.in_flight(), 0);
        assert_eq!(metrics.request_count("GET", "/users/:id", "2"), 1);
        assert_eq!(metrics.request_count("GET", "/users/:id", "5"), 0);
    }

    #[test]
    fn test_error_counter_is_independent() {
        let metrics = HttpMetrics::new("svc", "/metrics");
        metrics.record_error("upstream_timeout");
        metrics.record_error("upstream_timeout");
        metrics.record_error("timeout");

        assert_eq!(metrics.error_count("upstream_timeout"), 2);
        assert_eq!(metrics.error_count("timeout"), 1);
        assert_eq!(metrics.in_flight(), 0);
    }

    #[test]
    fn test_concurrent_increments_lose_nothing() {
        let metrics = Arc::new(HttpMetrics::new("svc", "/metrics"));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let metrics = metrics.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let timer = metrics.begin_request();
                    metrics.end_request(timer, "GET", "/hello", 200);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.request_count("GET", "/hello", "2"), 800);
        assert_eq!(metrics.in_flight(), 0);
    }

    #[test]
    fn test_prometheus_rendering() {
        let metrics = HttpMetrics::new("svc", "/metrics");
        let timer = metrics.begin_request();
        metrics.end_request(timer, "GET", "/users/:id", 404);
        metrics.record_error("decode");

        let text = metrics.render();
        assert!(text.contains("# TYPE svc_http_requests_total counter"));
        assert!(text.contains(
            "svc_http_requests_total{method=\"GET\",path=\"/users/:id\",status=\"4\"} 1"
        ));
        assert!(text.contains("# TYPE svc_http_request_duration_seconds histogram"));
        assert!(text.contains("le=\"+Inf\"} 1"));
        assert!(text
            .contains("svc_http_request_duration_seconds_count{method=\"GET\",path=\"/users/:id\"} 1"));
        assert!(text.contains("svc_http_requests_in_flight 0"));
        assert!(text.contains("svc_errors_total{type=\"decode\"} 1"));
        // Status labels carry the class, never the full code.
        assert!(!text.contains("status=\"404\""));
    }
}
