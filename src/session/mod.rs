//! Worker side of the protocol.
//!
//! ## Contents
//! - [`Session`] one connection driving one [`Supervisor`](crate::Supervisor)
//! - [`Worker`] accept loop spawning a session per connection, with graceful shutdown
//! - [`shutdown_signal`] OS termination signal helper used by [`Worker::run`]
//!
//! ## Architecture
//! ```text
//!   TcpListener ──accept──► Worker ──spawn──► Session (per peer)
//!                                               │
//!                         FramedRead ◄── read ──┤── write ──► outbox ──► FramedWrite
//!                                               │                ▲
//!                                               └─ Execution task ┘ (warnings, one terminal reply)
//! ```

mod connection;
mod signal;
mod worker;

pub use connection::Session;
pub use signal::shutdown_signal;
pub use worker::Worker;
