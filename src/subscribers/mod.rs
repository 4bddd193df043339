//! # Event subscribers for the workvisor runtime.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and (with the `logging` feature) the built-in [`LogWriter`].
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Supervisor/Session/Coordinator ── publish(Event) ──► Bus
//!                                                         │
//!                                          SubscriberSet::attach listener
//!                                                         │
//!                                     ┌───────────────────┼──────────────┐
//!                                     ▼                   ▼              ▼
//!                                 LogWriter            Metrics        Custom
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use workvisor::{Event, EventKind, Subscribe};
//! use async_trait::async_trait;
//!
//! struct TimeoutCounter;
//!
//! #[async_trait]
//! impl Subscribe for TimeoutCounter {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::TimeoutHit {
//!             // increment timeout counter
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "timeout-counter"
//!     }
//! }
//! ```

mod set;
mod subscribe;

#[cfg(feature = "logging")]
mod log;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
