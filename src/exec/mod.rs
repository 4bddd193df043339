//! Supervised execution of one job under a dual-timeout policy.
//!
//! This module groups the pieces a worker needs to run user code:
//!
//! ## Contents
//! - [`Limits`], [`WarningPolicy`] the non-critical / critical deadlines and re-arm behavior
//! - [`Job`], [`JobFn`], [`JobRef`], [`JobContext`] the user computation and what it sees
//! - [`Supervisor`], [`Execution`] admission (one run at a time) and the run loop
//! - [`SupervisorStatus`], [`ExecState`] read-only snapshot served to status requests
//!
//! ## Lifecycle
//! ```text
//!            try_start()                 first of:
//!   Idle ───────────────► Running ───► cancel        ─► Cancelled
//!     ▲       (Busy if                ├► critical    ─► TimedOut
//!     │        Running)               ├► job Err     ─► Failed
//!     │                               └► job Ok      ─► Succeeded
//!     └──────────── next try_start() / reset() ◄────────────┘
//!
//!   non-critical deadline while Running ─► Warning (once, or every interval with Repeat)
//! ```

mod job;
mod limits;
mod status;
mod supervisor;

pub use job::{BoxJobFuture, Job, JobContext, JobFn, JobRef, int64_job};
pub use limits::{Limits, WarningPolicy};
pub use status::{ExecState, SupervisorStatus};
pub use supervisor::{Execution, Supervisor, Warning};
