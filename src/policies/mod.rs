//! Connection retry policies.
//!
//! The coordinator retries refused or timed-out connections to a worker
//! before giving up on it.
//!
//! ## Contents
//! - [`BackoffPolicy`] how the delay between connect attempts evolves (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization applied to each delay
//!
//! ## Wiring
//! ```text
//! Config { connect_attempts, connect_backoff: BackoffPolicy, connect_timeout }
//!      └─► Coordinator::connect:
//!           attempt 0 ─ fail ─► sleep(backoff.next(0)) ─► attempt 1 ─ ...
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=100ms, factor=1.0 (constant), max=5s, jitter=None.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
