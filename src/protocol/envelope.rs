//! # Envelope data model.
//!
//! An [`Envelope`] is a common header (timestamp) plus a kind-specific [`Body`].
//! The [`Kind`] byte on the wire is derived from the body variant, so a payload
//! can never disagree with its kind.
//!
//! ## Example
//! ```rust
//! use workvisor::{DataPayload, Envelope, Kind};
//!
//! let env = Envelope::data(DataPayload::int64(5));
//! assert_eq!(env.kind(), Kind::Data);
//! assert!(env.is_terminal());
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::ProtocolError;

/// Content type tag for 8-byte big-endian signed integers.
pub const INT64_CONTENT_TYPE: &str = "int64";

/// Content type tag for supervisor status snapshots (JSON).
pub const STATUS_CONTENT_TYPE: &str = "raw/status";

/// Envelope classification (wire byte values are fixed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    /// Data request or successful result.
    Data = 0,
    /// Advisory warning; the execution continues.
    NonFatalError = 1,
    /// Terminal failure of an execution or request.
    FatalError = 2,
    /// Cancel the in-flight execution (no response).
    CancelRequest = 3,
    /// Ask for the supervisor status snapshot.
    StatusRequest = 4,
}

impl Kind {
    /// Wire byte for this kind.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Short stable name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Data => "data",
            Kind::NonFatalError => "non_fatal_error",
            Kind::FatalError => "fatal_error",
            Kind::CancelRequest => "cancel_request",
            Kind::StatusRequest => "status_request",
        }
    }
}

impl TryFrom<u8> for Kind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Kind::Data),
            1 => Ok(Kind::NonFatalError),
            2 => Ok(Kind::FatalError),
            3 => Ok(Kind::CancelRequest),
            4 => Ok(Kind::StatusRequest),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

/// Opaque bytes tagged with a content type.
///
/// The wire `length` field is always `data().len()`; it is not stored separately.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataPayload {
    content_type: String,
    data: Bytes,
}

impl DataPayload {
    /// Creates a payload from a content type tag and bytes.
    pub fn new(content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// Encodes `value` as 8 big-endian bytes tagged [`INT64_CONTENT_TYPE`].
    pub fn int64(value: i64) -> Self {
        Self::new(INT64_CONTENT_TYPE, value.to_be_bytes().to_vec())
    }

    /// Interprets the payload as an [`INT64_CONTENT_TYPE`] value.
    pub fn as_int64(&self) -> Result<i64, ProtocolError> {
        if self.content_type != INT64_CONTENT_TYPE {
            return Err(ProtocolError::UnexpectedPayload {
                expected: INT64_CONTENT_TYPE,
                content_type: self.content_type.clone(),
            });
        }
        let raw: [u8; 8] =
            self.data
                .as_ref()
                .try_into()
                .map_err(|_| ProtocolError::LengthMismatch {
                    declared: 8,
                    actual: self.data.len(),
                })?;
        Ok(i64::from_be_bytes(raw))
    }

    /// Content type tag.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Payload bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Consumes the payload, returning its bytes.
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Number of payload bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Human-readable error message carried by warning and fatal envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    message: String,
}

impl ErrorPayload {
    /// Creates an error payload.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message text.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Kind-specific envelope body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Data request (coordinator → worker) or successful result (worker → coordinator).
    Data(DataPayload),
    /// Advisory warning.
    NonFatalError(ErrorPayload),
    /// Terminal failure.
    FatalError(ErrorPayload),
    /// Cancel the in-flight execution.
    CancelRequest,
    /// Status request.
    StatusRequest(DataPayload),
}

/// Immutable wire unit: timestamp header plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    timestamp: i64,
    body: Body,
}

impl Envelope {
    /// Creates an envelope with an explicit timestamp (nanoseconds since the Unix epoch).
    pub fn new(timestamp: i64, body: Body) -> Self {
        Self { timestamp, body }
    }

    /// Creates an envelope stamped with the current wall-clock time.
    pub fn now(body: Body) -> Self {
        Self::new(now_nanos(), body)
    }

    /// Data envelope carrying `payload`.
    pub fn data(payload: DataPayload) -> Self {
        Self::now(Body::Data(payload))
    }

    /// Advisory warning envelope.
    pub fn non_fatal(message: impl Into<String>) -> Self {
        Self::now(Body::NonFatalError(ErrorPayload::new(message)))
    }

    /// Fatal error envelope.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::now(Body::FatalError(ErrorPayload::new(message)))
    }

    /// Cancel request envelope.
    pub fn cancel_request() -> Self {
        Self::now(Body::CancelRequest)
    }

    /// Status request envelope (empty status payload).
    pub fn status_request() -> Self {
        Self::status_request_at(now_nanos())
    }

    /// Status request with an explicit timestamp.
    ///
    /// Workers stamp the status reply with the timestamp of the request it
    /// answers, so the timestamp doubles as a correlation tag.
    pub fn status_request_at(timestamp: i64) -> Self {
        Self::new(
            timestamp,
            Body::StatusRequest(DataPayload::new(STATUS_CONTENT_TYPE, Bytes::new())),
        )
    }

    /// Wire kind derived from the body.
    pub fn kind(&self) -> Kind {
        match self.body {
            Body::Data(_) => Kind::Data,
            Body::NonFatalError(_) => Kind::NonFatalError,
            Body::FatalError(_) => Kind::FatalError,
            Body::CancelRequest => Kind::CancelRequest,
            Body::StatusRequest(_) => Kind::StatusRequest,
        }
    }

    /// Timestamp in nanoseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Timestamp as wall-clock time (negative values clamp to the epoch).
    pub fn at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.timestamp.max(0) as u64)
    }

    /// Borrow the body.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Consumes the envelope, returning its body.
    pub fn into_body(self) -> Body {
        self.body
    }

    /// True for envelopes that end a `Data` exchange (`Data` or `FatalError`).
    pub fn is_terminal(&self) -> bool {
        matches!(self.body, Body::Data(_) | Body::FatalError(_))
    }

    /// True for data envelopes carrying a status snapshot.
    pub fn is_status_reply(&self) -> bool {
        matches!(&self.body, Body::Data(p) if p.content_type() == STATUS_CONTENT_TYPE)
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch (saturating).
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().min(i64::MAX as u128) as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_byte_values_are_fixed() {
        assert_eq!(Kind::Data.as_u8(), 0);
        assert_eq!(Kind::NonFatalError.as_u8(), 1);
        assert_eq!(Kind::FatalError.as_u8(), 2);
        assert_eq!(Kind::CancelRequest.as_u8(), 3);
        assert_eq!(Kind::StatusRequest.as_u8(), 4);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(matches!(
            Kind::try_from(5),
            Err(ProtocolError::UnknownKind(5))
        ));
    }

    #[test]
    fn test_int64_payload() {
        let p = DataPayload::int64(-42);
        assert_eq!(p.content_type(), INT64_CONTENT_TYPE);
        assert_eq!(p.len(), 8);
        assert_eq!(p.as_int64().unwrap(), -42);
    }

    #[test]
    fn test_int64_rejects_wrong_content_type() {
        let p = DataPayload::new("text/plain", &b"12345678"[..]);
        assert!(matches!(
            p.as_int64(),
            Err(ProtocolError::UnexpectedPayload { .. })
        ));
    }

    #[test]
    fn test_int64_rejects_wrong_width() {
        let p = DataPayload::new(INT64_CONTENT_TYPE, &b"5"[..]);
        assert!(matches!(
            p.as_int64(),
            Err(ProtocolError::LengthMismatch { declared: 8, actual: 1 })
        ));
    }

    #[test]
    fn test_kind_follows_body() {
        assert_eq!(Envelope::fatal("x").kind(), Kind::FatalError);
        assert_eq!(Envelope::non_fatal("x").kind(), Kind::NonFatalError);
        assert_eq!(Envelope::cancel_request().kind(), Kind::CancelRequest);
        assert_eq!(Envelope::status_request().kind(), Kind::StatusRequest);
        assert!(!Envelope::non_fatal("x").is_terminal());
        assert!(Envelope::fatal("x").is_terminal());
    }

    #[test]
    fn test_status_reply_detection() {
        let env = Envelope::data(DataPayload::new(STATUS_CONTENT_TYPE, &b"{}"[..]));
        assert!(env.is_status_reply());
        assert!(!Envelope::data(DataPayload::int64(1)).is_status_reply());
    }
}
