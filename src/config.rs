use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the observability stack.
///
/// Configuration problems are surfaced immediately by [`validate`] and are
/// fatal to startup; nothing in this struct is re-read after
/// [`crate::Stack::new`] returns.
///
/// [`validate`]: ObservabilityConfig::validate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Service identifier carried on every log record. Also the source of
    /// the metrics namespace after sanitization (see
    /// [`metrics_namespace`](ObservabilityConfig::metrics_namespace)).
    pub service_name: String,
    /// Logging filter string, compatible with `tracing_subscriber::EnvFilter`.
    /// Example: "info,zola_observe=debug"
    pub log_filter: String,
    /// Shared deadline bounding one whole readiness evaluation, not each
    /// probe individually.
    pub readiness_timeout: Duration,
    /// Path served by the metrics handler and excluded from request
    /// instrumentation.
    pub metrics_path: String,
}

impl ObservabilityConfig {
    /// Creates a configuration for the given service with default settings
    /// for everything else.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(crate::Error::config("service name must not be empty"));
        }
        if self.readiness_timeout.is_zero() {
            return Err(crate::Error::config("readiness timeout must be non-zero"));
        }
        if !self.metrics_path.starts_with('/') {
            return Err(crate::Error::config(format!(
                "metrics path '{}' must start with '/'",
                self.metrics_path
            )));
        }
        Ok(())
    }

    /// The Prometheus namespace derived from the service name: lowercased,
    /// with every character outside `[a-z0-9_]` mapped to `_`, and a leading
    /// underscore added when the name starts with a digit.
    pub fn metrics_namespace(&self) -> String {
        let mut namespace: String = self
            .service_name
            .trim()
            .chars()
            .map(|c| match c.to_ascii_lowercase() {
                c @ ('a'..='z' | '0'..='9' | '_') => c,
                _ => '_',
            })
            .collect();
        if namespace.starts_with(|c: char| c.is_ascii_digit()) {
            namespace.insert(0, '_');
        }
        namespace
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "zola-service".to_string(),
            log_filter: "info".to_string(),
            readiness_timeout: Duration::from_secs(5),
            metrics_path: "/metrics".to_string(),
        }
    }
}
