//! # Runtime events emitted by supervisors, sessions and the coordinator.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Execution events**: one supervised run (starting, warning, timeout, terminal states)
//! - **Session events**: connection lifecycle and protocol violations on the worker side
//! - **Dispatch events**: coordinator fan-out/fan-in rounds
//! - **Runtime events**: worker shutdown and subscriber health
//!
//! The [`Event`] struct carries additional metadata such as timestamps, source
//! name, reasons, limits and round numbers.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use workvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TimeoutHit)
//!     .with_source("127.0.0.1:8001")
//!     .with_reason("critical limit exceeded")
//!     .with_limit(Duration::from_secs(10));
//!
//! assert_eq!(ev.kind, EventKind::TimeoutHit);
//! assert_eq!(ev.limit_ms, Some(10_000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Execution events ===
    /// An execution was admitted and its job spawned.
    ///
    /// Sets: `source`, `limit_ms` (critical limit).
    ExecutionStarting,

    /// A non-fatal warning was raised (non-critical limit or job-emitted).
    ///
    /// Sets: `source`, `reason`, `elapsed_ms`.
    WarningRaised,

    /// The critical limit elapsed; the job was abandoned.
    ///
    /// Sets: `source`, `limit_ms`, `elapsed_ms`.
    TimeoutHit,

    /// The job returned a value.
    ///
    /// Sets: `source`, `elapsed_ms`.
    ExecutionSucceeded,

    /// The job reported a failure or timed out.
    ///
    /// Sets: `source`, `reason`, `elapsed_ms`.
    ExecutionFailed,

    /// The execution was cancelled externally.
    ///
    /// Sets: `source`, `elapsed_ms`.
    ExecutionCancelled,

    /// A new execution was rejected because one is still in flight.
    ///
    /// Sets: `source`.
    ExecutionRejected,

    // === Session events ===
    /// A worker session started serving a connection.
    ///
    /// Sets: `source` (peer).
    SessionOpened,

    /// A worker session finished.
    ///
    /// Sets: `source` (peer), `reason` (optional).
    SessionClosed,

    /// An inbound envelope could not be decoded or was not a valid request.
    ///
    /// Sets: `source` (peer), `reason`.
    ProtocolViolation,

    // === Dispatch events ===
    /// A dispatch round started.
    ///
    /// Sets: `round`.
    DispatchStarted,

    /// A worker delivered its result for the round.
    ///
    /// Sets: `source` (worker), `round`.
    WorkerReplied,

    /// A worker forwarded a non-fatal warning.
    ///
    /// Sets: `source` (worker), `round`, `reason`.
    WorkerWarned,

    /// Every worker answered; results were aggregated.
    ///
    /// Sets: `round`.
    DispatchCompleted,

    /// The round was aborted (fatal response, disconnect, send failure).
    ///
    /// Sets: `round`, `source` (worker responsible), `reason`.
    DispatchAborted,

    /// A cancel request was sent to a worker.
    ///
    /// Sets: `source` (worker), `round` (if sent during a round).
    CancelSent,

    // === Runtime events ===
    /// Shutdown requested (OS signal or token).
    ShutdownRequested,

    /// All sessions stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some sessions did not stop in time.
    GraceExceeded,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `source` (subscriber name), `reason`.
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `source` (subscriber name), `reason`.
    SubscriberOverflow,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Supervisor, peer or worker name, if applicable.
    pub source: Option<Arc<str>>,
    /// Human-readable reason (errors, warnings, overflow details).
    pub reason: Option<Arc<str>>,
    /// Limit involved in the event, in milliseconds (compact).
    pub limit_ms: Option<u32>,
    /// Time since the execution started, in milliseconds (compact).
    pub elapsed_ms: Option<u32>,
    /// Coordinator dispatch round.
    pub round: Option<u64>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            source: None,
            reason: None,
            limit_ms: None,
            elapsed_ms: None,
            round: None,
        }
    }

    /// Attaches a source name.
    #[inline]
    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a limit (stored as milliseconds).
    #[inline]
    pub fn with_limit(mut self, d: Duration) -> Self {
        self.limit_ms = Some(compact_ms(d));
        self
    }

    /// Attaches an elapsed time (stored as milliseconds).
    #[inline]
    pub fn with_elapsed(mut self, d: Duration) -> Self {
        self.elapsed_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a dispatch round number.
    #[inline]
    pub fn with_round(mut self, round: u64) -> Self {
        self.round = Some(round);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_source(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_source(subscriber)
            .with_reason(info)
    }

    /// True for events about subscriber health (never re-fanned to subscribers).
    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::new(EventKind::DispatchStarted);
        let b = Event::new(EventKind::DispatchStarted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_durations_saturate() {
        let ev = Event::new(EventKind::TimeoutHit).with_limit(Duration::from_secs(u64::MAX));
        assert_eq!(ev.limit_ms, Some(u32::MAX));
    }
}
