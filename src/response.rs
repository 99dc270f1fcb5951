//! Exactly-once capture of the response status at the outbound boundary.
//!
//! [`ResponseObserver`] decorates a [`ResponseSink`]: whichever of
//! `set_status` / `write_body` happens first fixes the recorded status
//! permanently, with a body write before any explicit status implying 200.
//! Later calls still pass through to the wrapped sink unchanged, they just
//! no longer alter the record. The captured [`ResponseOutcome`] is what the
//! metric recorder and the correlated logger consume after the downstream
//! handler returns.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use axum::http;
use http_body::Body;

/// Capability interface of the outbound response channel.
///
/// Mirrors the two operations a transport sink exposes, so the observer can
/// stand in front of any concrete sink without callers noticing.
pub trait ResponseSink {
    /// Sets the response status and begins the response head.
    fn set_status(&mut self, status: u16);
    /// Writes body bytes.
    fn write_body(&mut self, bytes: &[u8]);
}

/// Snapshot of what was observed on one response channel.
///
/// Owned by a single request's observer; read after the downstream handler
/// has returned control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseOutcome {
    /// The first status fixed on this response (200 when the body was begun
    /// without an explicit status, or when nothing was written at all).
    pub status_code: u16,
    /// Whether any body write was attempted.
    pub body_written: bool,
    /// Whether any write operation reached the channel at all.
    pub finalized: bool,
}

/// Stateful decorator recording the first status written to a sink.
///
/// The finalized flag is guarded by a compare-exchange, so the
/// first-write-wins guarantee holds even for repeated or racing writes from
/// careless downstream code.
pub struct ResponseObserver<S> {
    sink: S,
    status: AtomicU16,
    finalized: AtomicBool,
    body_written: AtomicBool,
}

impl<S: ResponseSink> ResponseObserver<S> {
    /// Wraps the given sink.
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            status: AtomicU16::new(200),
            finalized: AtomicBool::new(false),
            body_written: AtomicBool::new(false),
        }
    }

    /// Sets the response status. The first call (to either operation) fixes
    /// the recorded status; every call is forwarded to the sink unchanged.
    pub fn set_status(&mut self, status: u16) {
        if self.try_finalize() {
            self.status.store(status, Ordering::Release);
        }
        self.sink.set_status(status);
    }

    /// Writes body bytes. If no status was set yet, this implicitly fixes
    /// and forwards the conventional 200 before the bytes go out.
    pub fn write_body(&mut self, bytes: &[u8]) {
        if self.try_finalize() {
            self.status.store(200, Ordering::Release);
            self.sink.set_status(200);
        }
        self.body_written.store(true, Ordering::Release);
        self.sink.write_body(bytes);
    }

    /// The captured outcome. Valid once the downstream handler has returned.
    pub fn outcome(&self) -> ResponseOutcome {
        ResponseOutcome {
            status_code: self.status.load(Ordering::Acquire),
            body_written: self.body_written.load(Ordering::Acquire),
            finalized: self.finalized.load(Ordering::Acquire),
        }
    }

    /// Consumes the observer, returning the wrapped sink.
    pub fn into_inner(self) -> S {
        self.sink
    }

    fn try_finalize(&self) -> bool {
        self.finalized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// In-memory sink accumulating status and body bytes.
///
/// Used by the bundled endpoint handlers to assemble their responses through
/// an observer, and by tests.
#[derive(Debug, Default)]
pub struct BufferedSink {
    status: Option<u16>,
    body: Vec<u8>,
}

impl BufferedSink {
    /// The last status forwarded to this sink, defaulting to 200.
    pub fn status(&self) -> u16 {
        self.status.unwrap_or(200)
    }

    /// The accumulated body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consumes the sink, returning the accumulated body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

impl ResponseSink for BufferedSink {
    fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    fn write_body(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }
}

/// Sink that discards everything; used when only the recorded outcome
/// matters.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ResponseSink for NullSink {
    fn set_status(&mut self, _status: u16) {}
    fn write_body(&mut self, _bytes: &[u8]) {}
}

/// Derives the outcome of an already-assembled response by replaying its
/// head through an observer: the status first, then a body write unless the
/// body is known to be empty from its size hint.
///
/// This is the boundary the instrumentation middleware reads after
/// downstream returns; the body stream itself is never touched.
pub fn observe_response<B: Body>(response: &http::Response<B>) -> ResponseOutcome {
    let mut observer = ResponseObserver::new(NullSink);
    observer.set_status(response.status().as_u16());
    if response.body().size_hint().exact() != Some(0) {
        observer.write_body(&[]);
    }
    observer.outcome()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_status_wins() {
        let mut observer = ResponseObserver::new(BufferedSink::default());
        observer.set_status(201);
        observer.write_body(b"created");
        observer.set_status(404);

        let outcome = observer.outcome();
        assert_eq!(outcome.status_code, 201);
        assert!(outcome.body_written);
        assert!(outcome.finalized);
    }

    #[test]
    fn test_body_write_implies_200() {
        let mut observer = ResponseObserver::new(BufferedSink::default());
        observer.write_body(b"hello");

        let outcome = observer.outcome();
        assert_eq!(outcome.status_code, 200);
        assert!(outcome.body_written);

        // The implicit status reached the sink before the bytes did.
        assert_eq!(observer.into_inner().status(), 200);
    }

    #[test]
    fn test_later_writes_pass_through_unchanged() {
        let mut observer = ResponseObserver::new(BufferedSink::default());
        observer.set_status(500);
        observer.set_status(200);
        observer.write_body(b"a");
        observer.write_body(b"b");

        assert_eq!(observer.outcome().status_code, 500);
        let sink = observer.into_inner();
        // The sink saw every call, including the ignored second status.
        assert_eq!(sink.status(), 200);
        assert_eq!(sink.body(), b"ab");
    }

    #[test]
    fn test_untouched_observer_is_not_finalized() {
        let observer = ResponseObserver::new(NullSink);
        let outcome = observer.outcome();
        assert!(!outcome.finalized);
        assert!(!outcome.body_written);
        assert_eq!(outcome.status_code, 200);
    }

    #[test]
    fn test_observe_response_head() {
        let response = http::Response::builder()
            .status(404)
            .body(axum::body::Body::from("missing"))
            .unwrap();

        let outcome = observe_response(&response);
        assert_eq!(outcome.status_code, 404);
        assert!(outcome.body_written);

        let empty = http::Response::builder()
            .status(204)
            .body(axum::body::Body::empty())
            .unwrap();
        let outcome = observe_response(&empty);
        assert_eq!(outcome.status_code, 204);
        assert!(!outcome.body_written);
    }
}
