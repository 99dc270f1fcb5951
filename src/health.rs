//! Dependency probes and readiness aggregation.
//!
//! A [`Probe`] is a named, deadline-bounded check of one external
//! dependency. The [`ReadinessAggregator`] runs every registered probe
//! concurrently under one shared deadline and combines the outcomes into a
//! [`ReadinessVerdict`]: overall ok iff every probe passed, with per-probe
//! results in registration order. A probe that has not completed when the
//! deadline elapses is reported as that probe's failure and its work is
//! cancelled; the aggregator never blocks past the deadline.
//!
//! Liveness is deliberately a separate, trivial policy: the process is
//! alive, regardless of dependency health.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::{FutureExt, TryFutureExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Error text reported for probes still outstanding when the shared
/// deadline elapses.
pub const DEADLINE_EXCEEDED: &str = "readiness deadline exceeded";

type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Pass/fail marker serialized as `"ok"` / `"error"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    /// The check passed.
    Ok,
    /// The check failed or timed out.
    Error,
}

/// Outcome of one probe invocation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    /// Probe name, as registered.
    pub name: String,
    /// Pass/fail marker.
    pub status: ProbeStatus,
    /// Failure description; present iff the probe failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    /// Whether this probe passed.
    pub fn is_ok(&self) -> bool {
        self.status == ProbeStatus::Ok
    }

    fn pass(name: String) -> Self {
        Self {
            name,
            status: ProbeStatus::Ok,
            error: None,
        }
    }

    fn fail(name: String, message: impl Into<String>) -> Self {
        Self {
            name,
            status: ProbeStatus::Error,
            error: Some(message.into()),
        }
    }
}

/// Combined outcome of one readiness evaluation.
///
/// Created fresh per evaluation, never cached: dependencies can change state
/// between calls. Serializes to the readiness endpoint's body shape, with
/// `checks` omitted when empty (the liveness case).
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessVerdict {
    /// `"ok"` iff every check passed.
    pub status: ProbeStatus,
    /// Per-probe results, in registration order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<ProbeResult>,
}

impl ReadinessVerdict {
    /// Whether every check passed.
    pub fn all_ok(&self) -> bool {
        self.status == ProbeStatus::Ok
    }
}

/// A named dependency check: `{ name, invoke }`, fixed at registration time.
#[derive(Clone)]
pub struct Probe {
    name: String,
    check: CheckFn,
}

impl Probe {
    /// Creates a probe from any async round-trip against a dependency
    /// handle. The check's error maps to the probe result's error text.
    pub fn new<F, Fut, E>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::fmt::Display,
    {
        let check: CheckFn = Arc::new(move || {
            check()
                .map_err(|err| Error::probe(err.to_string()))
                .boxed()
        });
        Self {
            name: name.into(),
            check,
        }
    }

    /// Creates an HTTP reachability probe: a GET against `url` whose
    /// response status must be below 400.
    ///
    /// The request is bounded solely by the aggregator's shared deadline.
    ///
    /// Built on the raw check channel rather than [`Probe::new`] so
    /// transport errors keep their [`Error::Http`] categorization instead
    /// of being re-rendered through `Display`.
    pub fn http(name: impl Into<String>, url: impl Into<String>, options: HttpProbeOptions) -> Self {
        let url = url.into();
        let check: CheckFn = Arc::new(move || {
            let url = url.clone();
            let options = options.clone();
            async move {
                let mut builder = reqwest::Client::builder();
                if !options.accept_redirects {
                    builder = builder.redirect(reqwest::redirect::Policy::none());
                }
                let client = builder.build()?;
                let status = client.get(&url).send().await?.status();
                if status.as_u16() >= 400 {
                    return Err(Error::probe(format!("{url} returned status {status}")));
                }
                if !options.accept_redirects && status.is_redirection() {
                    return Err(Error::probe(format!("{url} redirected with status {status}")));
                }
                Ok(())
            }
            .boxed()
        });
        Self {
            name: name.into(),
            check,
        }
    }

    /// The probe's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Behavior of [`Probe::http`] for 3xx responses.
///
/// Whether a redirecting dependency counts as reachable is an explicit
/// choice, not a guess: with `accept_redirects` (the default) the client
/// follows redirects and a 3xx chain ending below 400 passes; without it
/// the client does not follow redirects and any 3xx response is reported as
/// the probe's failure.
#[derive(Debug, Clone)]
pub struct HttpProbeOptions {
    /// Treat 3xx responses as success.
    pub accept_redirects: bool,
}

impl Default for HttpProbeOptions {
    fn default() -> Self {
        Self {
            accept_redirects: true,
        }
    }
}

/// Runs registered probes under one shared deadline and merges the
/// outcomes.
pub struct ReadinessAggregator {
    probes: Vec<Probe>,
    timeout: Duration,
}

impl ReadinessAggregator {
    /// Creates an aggregator whose evaluations are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            probes: Vec::new(),
            timeout,
        }
    }

    /// Registers a probe. Names must be non-empty and unique; violations
    /// are configuration errors, fatal at setup time.
    pub fn register(&mut self, probe: Probe) -> Result<()> {
        if probe.name.trim().is_empty() {
            return Err(Error::config("probe name must not be empty"));
        }
        if self.probes.iter().any(|existing| existing.name == probe.name) {
            return Err(Error::config(format!(
                "probe '{}' is already registered",
                probe.name
            )));
        }
        self.probes.push(probe);
        Ok(())
    }

    /// Number of registered probes.
    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// Runs every probe concurrently under the shared deadline and returns
    /// the combined verdict, results in registration order.
    ///
    /// Probe failures (including deadline exhaustion) are recovered into
    /// results here; this method itself cannot fail. Futures still pending
    /// at the deadline are dropped, cancelling their work.
    pub async fn evaluate(&self) -> ReadinessVerdict {
        let deadline = tokio::time::Instant::now() + self.timeout;

        let checks = self.probes.iter().map(|probe| {
            let name = probe.name.clone();
            let check = (probe.check)();
            async move {
                match tokio::time::timeout_at(deadline, check).await {
                    Ok(Ok(())) => ProbeResult::pass(name),
                    Ok(Err(err)) => ProbeResult::fail(name, failure_text(err)),
                    Err(_) => ProbeResult::fail(name, DEADLINE_EXCEEDED),
                }
            }
        });

        let checks = join_all(checks).await;
        let all_ok = checks.iter().all(ProbeResult::is_ok);
        if all_ok {
            debug!(probes = checks.len(), "readiness evaluation passed");
        } else {
            let failing: Vec<&str> = checks
                .iter()
                .filter(|result| !result.is_ok())
                .map(|result| result.name.as_str())
                .collect();
            warn!(?failing, "readiness evaluation failed");
        }

        ReadinessVerdict {
            status: if all_ok {
                ProbeStatus::Ok
            } else {
                ProbeStatus::Error
            },
            checks,
        }
    }
}

/// Error text reported for a failed probe. A check's own message is carried
/// verbatim, without the enum's rendering prefix; transport and other
/// categorized errors keep their full rendering.
fn failure_text(err: Error) -> String {
    match err {
        Error::Probe(message) => message,
        other => other.to_string(),
    }
}

/// The liveness verdict: zero probes, always ok. Kept separate from
/// readiness so "alive" and "ready" remain distinct policies.
pub fn liveness_verdict() -> ReadinessVerdict {
    ReadinessVerdict {
        status: ProbeStatus::Ok,
        checks: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn ok_probe(name: &str) -> Probe {
        Probe::new(name, || async { Ok::<(), Infallible>(()) })
    }

    fn failing_probe(name: &str, message: &'static str) -> Probe {
        Probe::new(name, move || async move { Err::<(), _>(message) })
    }

    #[test]
    fn test_registration_rejects_empty_and_duplicate_names() {
        let mut aggregator = ReadinessAggregator::new(Duration::from_secs(1));
        assert!(aggregator.register(ok_probe("")).is_err());
        assert!(aggregator.register(ok_probe("db")).is_ok());
        assert!(matches!(
            aggregator.register(ok_probe("db")),
            Err(Error::Config(_))
        ));
        assert_eq!(aggregator.probe_count(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_preserves_order() {
        let mut aggregator = ReadinessAggregator::new(Duration::from_secs(1));
        aggregator.register(ok_probe("p1")).unwrap();
        aggregator.register(failing_probe("p2", "db down")).unwrap();

        let verdict = aggregator.evaluate().await;
        assert!(!verdict.all_ok());
        assert_eq!(verdict.checks.len(), 2);
        assert_eq!(verdict.checks[0].name, "p1");
        assert!(verdict.checks[0].is_ok());
        assert_eq!(verdict.checks[1].name, "p2");
        assert_eq!(verdict.checks[1].error.as_deref(), Some("db down"));
    }

    #[tokio::test]
    async fn test_failure_text_is_the_checks_message_verbatim() {
        let mut aggregator = ReadinessAggregator::new(Duration::from_secs(1));
        aggregator
            .register(failing_probe("db", "connection refused"))
            .unwrap();

        let verdict = aggregator.evaluate().await;
        let error = verdict.checks[0].error.as_deref().unwrap();
        assert_eq!(error, "connection refused");
        assert!(!error.contains("Probe failure"));
    }

    #[tokio::test]
    async fn test_deadline_bounds_the_whole_evaluation() {
        let mut aggregator = ReadinessAggregator::new(Duration::from_millis(100));
        aggregator.register(ok_probe("fast")).unwrap();
        aggregator
            .register(Probe::new("slow", || async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<(), Infallible>(())
            }))
            .unwrap();

        let started = Instant::now();
        let verdict = aggregator.evaluate().await;
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
        assert!(!verdict.all_ok());
        assert!(verdict.checks[0].is_ok());
        assert_eq!(verdict.checks[1].error.as_deref(), Some(DEADLINE_EXCEEDED));
    }

    #[tokio::test]
    async fn test_verdict_is_fresh_per_evaluation() {
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let probe_flag = flag.clone();
        let mut aggregator = ReadinessAggregator::new(Duration::from_secs(1));
        aggregator
            .register(Probe::new("toggle", move || {
                let flag = probe_flag.clone();
                async move {
                    if flag.load(std::sync::atomic::Ordering::SeqCst) {
                        Err("now failing")
                    } else {
                        Ok(())
                    }
                }
            }))
            .unwrap();

        assert!(aggregator.evaluate().await.all_ok());
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(!aggregator.evaluate().await.all_ok());
    }

    #[test]
    fn test_liveness_is_always_ok() {
        let verdict = liveness_verdict();
        assert!(verdict.all_ok());
        assert!(verdict.checks.is_empty());
        assert_eq!(
            serde_json::to_string(&verdict).unwrap(),
            r#"{"status":"ok"}"#
        );
    }

    #[test]
    fn test_result_serialization_shape() {
        let verdict = ReadinessVerdict {
            status: ProbeStatus::Error,
            checks: vec![
                ProbeResult::pass("p1".to_string()),
                ProbeResult::fail("p2".to_string(), "db down"),
            ],
        };
        assert_eq!(
            serde_json::to_string(&verdict).unwrap(),
            r#"{"status":"error","checks":[{"name":"p1","status":"ok"},{"name":"p2","status":"error","error":"db down"}]}"#
        );
    }

    async fn serve_one_response(raw: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(raw.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_http_probe_passes_on_2xx() {
        let url = serve_one_response("HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n").await;
        let probe = Probe::http("upstream", url, HttpProbeOptions::default());

        let mut aggregator = ReadinessAggregator::new(Duration::from_secs(2));
        aggregator.register(probe).unwrap();
        assert!(aggregator.evaluate().await.all_ok());
    }

    #[tokio::test]
    async fn test_http_probe_fails_on_5xx() {
        let url =
            serve_one_response("HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\n\r\n")
                .await;
        let probe = Probe::http("upstream", url, HttpProbeOptions::default());

        let mut aggregator = ReadinessAggregator::new(Duration::from_secs(2));
        aggregator.register(probe).unwrap();
        let verdict = aggregator.evaluate().await;
        assert!(!verdict.all_ok());
        assert!(verdict.checks[0]
            .error
            .as_deref()
            .unwrap()
            .contains("503"));
    }

    #[tokio::test]
    async fn test_http_probe_rejects_redirect_when_configured() {
        let url = serve_one_response(
            "HTTP/1.1 302 Found\r\nlocation: /elsewhere\r\ncontent-length: 0\r\n\r\n",
        )
        .await;
        let probe = Probe::http(
            "upstream",
            url,
            HttpProbeOptions {
                accept_redirects: false,
            },
        );

        let mut aggregator = ReadinessAggregator::new(Duration::from_secs(2));
        aggregator.register(probe).unwrap();
        let verdict = aggregator.evaluate().await;
        assert!(!verdict.all_ok());
        assert!(verdict.checks[0]
            .error
            .as_deref()
            .unwrap()
            .contains("redirected"));
    }
}
