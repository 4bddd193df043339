//! Coordinator side of the protocol: fan one input out to every worker and
//! fan the results back in.
//!
//! ## Contents
//! - [`Coordinator`] connects, dispatches rounds, queries status, cancels
//! - [`WorkerLink`] one connection: serialized writes plus a demultiplexing reader
//! - [`AggregateResult`], [`WorkerOutcome`] per-round results
//! - [`LinkState`] connection bookkeeping exposed to callers
//!
//! ## Round
//! ```text
//! dispatch(input)
//!   ├─ send Data to w1, w2, ... (sequential)
//!   ├─ one waiter per worker (concurrent, shared round scope)
//!   │     skips stale terminal replies, collects warnings, returns own terminal reply
//!   └─ fan-in:
//!        all Data        ─► AggregateResult                 (DispatchCompleted)
//!        first Fatal /   ─► cancel scope, CancelRequest to  (DispatchAborted)
//!        disconnect         every still-pending worker
//! ```

mod aggregate;
mod link;
mod round;

pub use aggregate::{AggregateResult, WorkerOutcome};
pub use link::{LinkState, WorkerLink};
pub use round::Coordinator;
