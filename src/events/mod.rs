//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by execution supervisors,
//! worker sessions, the worker accept loop and the coordinator.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor`/`Execution`, `Session`, `Worker`, `Coordinator`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the listener spawned by [`SubscriberSet::attach`](crate::SubscriberSet::attach),
//!   which fans out to user subscribers.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
