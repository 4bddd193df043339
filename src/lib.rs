//! # workvisor
//!
//! **Workvisor** runs a unit of work on remote workers under a two-tier
//! timeout policy and aggregates the results on a coordinator.
//!
//! It provides three building blocks:
//! - an execution [`Supervisor`] that runs one job at a time under a
//!   non-critical (advisory) and a critical (terminal) deadline;
//! - a self-framing wire [`Envelope`] protocol carrying data, warnings,
//!   fatal errors, cancel and status requests;
//! - a [`Coordinator`] that fans one input out to every worker and fans the
//!   results back in under a shared cancellation scope.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                          ┌───────────────────────────┐
//!                          │        Coordinator        │
//!                          │  round scope, fan-in sum  │
//!                          └─────┬───────────────┬─────┘
//!                   WorkerLink   │               │   WorkerLink
//!                 (Data/Cancel/  ▼               ▼   Status requests)
//!     ┌────────────────────────────────┐   ┌────────────────────────────────┐
//!     │ Worker (accept loop, grace)    │   │ Worker                         │
//!     │  └─► Session (per connection)  │   │  └─► Session                   │
//!     │        └─► Supervisor          │   │        └─► Supervisor          │
//!     │              └─► Job           │   │              └─► Job           │
//!     └───────────────┬────────────────┘   └───────────────┬────────────────┘
//!                     │ publish(Event)                     │
//!                     ▼                                    ▼
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                            │
//! └───────────────────────────────────┬───────────────────────────────────────┘
//!                                     ▼
//!                         SubscriberSet::attach listener
//!                          ┌──────────┼──────────┐
//!                          ▼          ▼          ▼
//!                      LogWriter    sub2       subN
//! ```
//!
//! ### One execution
//! ```text
//! Data ──► Session ──► Supervisor::try_start ──(Busy)──► FatalError("busy: ...")
//!                          │
//!                          ▼
//!                      Execution::run
//!                          ├─ non-critical deadline ─► NonFatalError (once, or Repeat)
//!                          ├─ job warning           ─► NonFatalError
//!                          └─ first of:
//!                               job Ok      ─► Data(result)
//!                               job Err     ─► FatalError("failed: ...")
//!                               critical    ─► FatalError("timeout: ...")
//!                               cancel      ─► FatalError("cancelled")
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                          |
//! |-------------------|---------------------------------------------------------------|---------------------------------------------|
//! | **Execution**     | Dual-timeout, cancellable, one-at-a-time job runs.            | [`Supervisor`], [`Limits`], [`Job`]         |
//! | **Protocol**      | Tagged envelopes and a `tokio-util` codec.                    | [`Envelope`], [`Body`], [`EnvelopeCodec`]   |
//! | **Worker**        | Per-connection sessions and an accept loop.                   | [`Session`], [`Worker`]                     |
//! | **Coordinator**   | Fan-out / fan-in with abort-all on first fatal reply.         | [`Coordinator`], [`AggregateResult`]        |
//! | **Subscriber API**| Hook into runtime events (logging, metrics, custom).          | [`Subscribe`], [`SubscriberSet`]            |
//! | **Errors**        | Typed errors per layer.                                       | [`ExecError`], [`DispatchError`], ...       |
//! | **Configuration** | Defaults plus environment overrides.                          | [`Config`]                                  |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] rendering events through `tracing`.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use workvisor::{Bus, DataPayload, JobContext, Limits, Supervisor, WarningPolicy, int64_job};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let limits = Limits::new(Duration::from_secs(1), Duration::from_secs(2))?;
//!     let supervisor = Supervisor::new(limits, WarningPolicy::Once, Bus::default());
//!
//!     let job = int64_job("plus-one", |n: i64, _ctx: JobContext| async move { Ok(n + 1) });
//!     let (warnings, _rx) = tokio::sync::mpsc::unbounded_channel();
//!     let out = supervisor
//!         .run(&job, DataPayload::int64(4), CancellationToken::new(), warnings)
//!         .await?;
//!
//!     assert_eq!(out.as_int64()?, 5);
//!     Ok(())
//! }
//! ```
mod config;
mod coordinator;
mod error;
mod events;
mod exec;
mod policies;
mod protocol;
mod session;
mod subscribers;

// ---- Public re-exports ----

pub use config::Config;
pub use coordinator::{AggregateResult, Coordinator, LinkState, WorkerLink, WorkerOutcome};
pub use error::{ConfigError, DispatchError, ExecError, JobError, ProtocolError, RuntimeError};
pub use events::{Bus, Event, EventKind};
pub use exec::{
    BoxJobFuture, ExecState, Execution, Job, JobContext, JobFn, JobRef, Limits, Supervisor,
    SupervisorStatus, Warning, WarningPolicy, int64_job,
};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use protocol::{
    Body, DataPayload, Envelope, EnvelopeCodec, ErrorPayload, INT64_CONTENT_TYPE, Kind,
    MAX_FRAME_LEN, STATUS_CONTENT_TYPE, decode, encode, now_nanos,
};
pub use session::{Session, Worker, shutdown_signal};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: built-in subscriber rendering events through `tracing`.
// Enable with: `--features logging` (on by default)
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
