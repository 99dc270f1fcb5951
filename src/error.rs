use thiserror::Error as ThisError;

/// Crate result type, wrapping the crate's [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Observability error types, categorized for clarity and handling.
///
/// Only setup-time problems ([`Error::Config`], [`Error::Init`]) are ever
/// surfaced to callers as hard failures. Probe errors are recovered into
/// [`crate::health::ProbeResult`] values, and the recording paths (metrics,
/// log emission) expose no `Result` at all, so an observability fault can
/// never abort a request being served.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid configuration (empty service name, malformed probe
    /// registration, bad filter directive). Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A dependency probe reported a failure. Always recovered locally into
    /// a probe result, never propagated out of a readiness evaluation.
    #[error("Probe failure: {0}")]
    Probe(String),

    /// Outbound request failure inside the HTTP reachability probe.
    #[error("HTTP probe request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Failure while installing global infrastructure (tracing subscriber).
    #[error("Initialization error: {0}")]
    Init(String),

    /// I/O errors from serving the standalone observability listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a Probe error.
    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    /// Creates an Init error.
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Init(msg.into())
    }
}
