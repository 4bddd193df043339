//! Wire envelope protocol shared by coordinators and workers.
//!
//! ## Contents
//! - [`Envelope`], [`Body`], [`Kind`] the tagged message model
//! - [`DataPayload`], [`ErrorPayload`] kind-specific payloads
//! - [`EnvelopeCodec`] self-framing codec for `FramedRead`/`FramedWrite`
//! - [`encode`], [`decode`] one-shot helpers over complete frames
//!
//! ## Frame layout
//! All integers are **big-endian**.
//! ```text
//! ┌────────────┬──────────┬───────────────┬──────────────────────────────────┐
//! │ frame_len  │ kind     │ timestamp     │ kind-specific body               │
//! │ u32 (4)    │ u8 (1)   │ i64 ns (8)    │                                  │
//! └────────────┴──────────┴───────────────┴──────────────────────────────────┘
//!
//! Data / StatusRequest:  content_type_len u32 │ content_type utf-8 │ data_len i32 │ data
//! NonFatal / FatalError: message_len u32      │ message utf-8
//! CancelRequest:         (empty)
//! ```
//! `frame_len` counts every byte after itself, so a reader always knows where
//! the next frame starts.

mod codec;
mod envelope;

pub use codec::{EnvelopeCodec, MAX_FRAME_LEN, decode, encode};
pub use envelope::{
    Body, DataPayload, Envelope, ErrorPayload, INT64_CONTENT_TYPE, Kind, STATUS_CONTENT_TYPE,
    now_nanos,
};
