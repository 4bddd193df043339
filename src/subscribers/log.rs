//! # Logging subscriber that renders events through `tracing`.
//!
//! [`LogWriter`] maps every [`EventKind`] to a single `tracing` record with
//! structured fields. Install any `tracing` subscriber (for example
//! `tracing_subscriber::fmt` with an `EnvFilter`) to see the output.
//!
//! ## Output (fmt layer)
//! ```text
//! INFO  execution starting source=worker limit_ms=10000
//! WARN  warning raised source=worker reason="still running after 5s" elapsed_ms=5000
//! WARN  timeout hit source=worker limit_ms=10000 elapsed_ms=10000
//! INFO  dispatch completed round=3
//! ```
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use workvisor::{Bus, LogWriter, Subscribe, SubscriberSet};
//!
//! # #[tokio::main] async fn main() {
//! let bus = Bus::default();
//! let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
//! let set = Arc::new(SubscriberSet::new(subs, bus.clone()));
//! # }
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};

use super::Subscribe;

/// Subscriber that writes events as `tracing` records.
///
/// Enabled via the `logging` feature (on by default).
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let source = e.source.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::ExecutionStarting => {
                tracing::info!(source, limit_ms = e.limit_ms, "execution starting");
            }
            EventKind::WarningRaised => {
                tracing::warn!(source, reason, elapsed_ms = e.elapsed_ms, "warning raised");
            }
            EventKind::TimeoutHit => {
                tracing::warn!(
                    source,
                    limit_ms = e.limit_ms,
                    elapsed_ms = e.elapsed_ms,
                    "timeout hit"
                );
            }
            EventKind::ExecutionSucceeded => {
                tracing::info!(source, elapsed_ms = e.elapsed_ms, "execution succeeded");
            }
            EventKind::ExecutionFailed => {
                tracing::warn!(source, reason, elapsed_ms = e.elapsed_ms, "execution failed");
            }
            EventKind::ExecutionCancelled => {
                tracing::info!(source, elapsed_ms = e.elapsed_ms, "execution cancelled");
            }
            EventKind::ExecutionRejected => {
                tracing::warn!(source, "execution rejected: busy");
            }
            EventKind::SessionOpened => tracing::info!(peer = source, "session opened"),
            EventKind::SessionClosed => tracing::info!(peer = source, reason, "session closed"),
            EventKind::ProtocolViolation => {
                tracing::warn!(peer = source, reason, "protocol violation");
            }
            EventKind::DispatchStarted => tracing::info!(round = e.round, "dispatch started"),
            EventKind::WorkerReplied => {
                tracing::debug!(worker = source, round = e.round, "worker replied");
            }
            EventKind::WorkerWarned => {
                tracing::warn!(worker = source, round = e.round, reason, "worker warned");
            }
            EventKind::DispatchCompleted => tracing::info!(round = e.round, "dispatch completed"),
            EventKind::DispatchAborted => {
                tracing::error!(worker = source, round = e.round, reason, "dispatch aborted");
            }
            EventKind::CancelSent => {
                tracing::info!(worker = source, round = e.round, "cancel request sent");
            }
            EventKind::ShutdownRequested => tracing::info!("shutdown requested"),
            EventKind::AllStoppedWithin => tracing::info!("all sessions stopped within grace"),
            EventKind::GraceExceeded => tracing::error!(reason, "grace exceeded"),
            EventKind::SubscriberPanicked | EventKind::SubscriberOverflow => {
                tracing::warn!(subscriber = source, reason, "subscriber degraded");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
