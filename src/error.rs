//! Error types used by the workvisor runtime, protocol and jobs.
//!
//! This module defines the error taxonomy of the crate:
//!
//! - [`ProtocolError`]: malformed, truncated or oversized envelopes and transport failures.
//! - [`ExecError`]: terminal outcomes of one supervised execution other than success.
//! - [`JobError`]: failures reported by a user job.
//! - [`ConfigError`]: rejected configuration (limits out of order, bad env values).
//! - [`DispatchError`]: failures of a coordinator dispatch round.
//! - [`RuntimeError`]: failures of the worker runtime itself (bind, grace period).
//!
//! Every type provides `as_label` (stable snake_case label for logs/metrics) and
//! `as_message` (human-readable details).

use std::time::Duration;
use thiserror::Error;

/// # Errors produced while encoding or decoding envelopes.
///
/// A `ProtocolError` is always fatal to the offending message only: sessions
/// answer it with a `FatalError` envelope and keep reading.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Input ended before a complete field could be read.
    #[error("truncated envelope: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required by the field being read.
        needed: usize,
        /// Bytes left in the input.
        available: usize,
    },

    /// A declared length disagrees with the bytes actually present.
    #[error("length mismatch: declared {declared} bytes, found {actual}")]
    LengthMismatch {
        /// Length announced by the header or length field.
        declared: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// The kind byte is not one of the known envelope kinds.
    #[error("unknown envelope kind {0}")]
    UnknownKind(u8),

    /// A frame exceeds the maximum supported size.
    #[error("frame of {len} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Size of the offending frame.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A signed length field carried a negative value.
    #[error("negative length field: {0}")]
    NegativeLength(i32),

    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidString(#[from] std::str::Utf8Error),

    /// The payload could not be interpreted with its declared content type.
    #[error("unexpected payload: expected {expected}, got content type {content_type:?}")]
    UnexpectedPayload {
        /// What the reader expected.
        expected: &'static str,
        /// Content type found in the payload.
        content_type: String,
    },

    /// A status payload was not a valid status snapshot.
    #[error("invalid status payload: {0}")]
    InvalidStatus(#[from] serde_json::Error),

    /// Underlying transport failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProtocolError::Truncated { .. } => "protocol_truncated",
            ProtocolError::LengthMismatch { .. } => "protocol_length_mismatch",
            ProtocolError::UnknownKind(_) => "protocol_unknown_kind",
            ProtocolError::FrameTooLarge { .. } => "protocol_frame_too_large",
            ProtocolError::NegativeLength(_) => "protocol_negative_length",
            ProtocolError::InvalidString(_) => "protocol_invalid_string",
            ProtocolError::UnexpectedPayload { .. } => "protocol_unexpected_payload",
            ProtocolError::InvalidStatus(_) => "protocol_invalid_status",
            ProtocolError::Io(_) => "protocol_io",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        format!("invalid request: {self}")
    }

    /// True when the byte stream can no longer be trusted to be frame aligned.
    ///
    /// Only transport failures do: every other error is confined to one frame.
    pub fn breaks_framing(&self) -> bool {
        matches!(self, ProtocolError::Io(_))
    }
}

/// # Terminal outcomes of a supervised execution other than success.
///
/// `Canceled` is a distinct, non-error terminal state; every other variant is fatal.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Execution exceeded the critical limit and was abandoned.
    #[error("timeout: execution exceeded critical limit of {limit:?}")]
    Timeout {
        /// The critical limit that was exceeded.
        limit: Duration,
    },

    /// The job itself reported a failure.
    #[error("execution failed: {reason}")]
    Failed {
        /// Failure reason surfaced by the job.
        reason: String,
    },

    /// Execution was cancelled by an external request.
    #[error("execution cancelled")]
    Canceled,

    /// Another execution is still outstanding on this supervisor.
    #[error("busy: another execution is still in flight")]
    Busy,
}

impl ExecError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use workvisor::ExecError;
    /// use std::time::Duration;
    ///
    /// let err = ExecError::Timeout { limit: Duration::from_secs(2) };
    /// assert_eq!(err.as_label(), "exec_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecError::Timeout { .. } => "exec_timeout",
            ExecError::Failed { .. } => "exec_failed",
            ExecError::Canceled => "exec_canceled",
            ExecError::Busy => "exec_busy",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ExecError::Timeout { limit } => format!("timeout: critical limit {limit:?} exceeded"),
            ExecError::Failed { reason } => format!("failed: {reason}"),
            ExecError::Canceled => "cancelled".to_string(),
            ExecError::Busy => "busy: execution already in flight".to_string(),
        }
    }

    /// Indicates whether the outcome aborts the owning execution as a failure.
    ///
    /// # Example
    /// ```
    /// use workvisor::ExecError;
    ///
    /// assert!(ExecError::Busy.is_fatal());
    /// assert!(!ExecError::Canceled.is_fatal());
    /// ```
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ExecError::Canceled)
    }
}

/// # Errors reported by a user job.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The job's argument could not be interpreted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The computation failed.
    #[error("{0}")]
    Fail(String),
}

impl JobError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            JobError::InvalidInput(_) => "job_invalid_input",
            JobError::Fail(_) => "job_failed",
        }
    }
}

impl From<ProtocolError> for JobError {
    fn from(err: ProtocolError) -> Self {
        JobError::InvalidInput(err.to_string())
    }
}

/// # Configuration errors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `non_critical` must be strictly smaller than `critical`.
    #[error("non-critical limit {non_critical:?} must be below critical limit {critical:?}")]
    LimitsOutOfOrder {
        /// Advisory limit.
        non_critical: Duration,
        /// Terminal limit.
        critical: Duration,
    },

    /// Limits must be non-zero.
    #[error("execution limits must be non-zero")]
    ZeroLimit,

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Environment variable name.
        key: &'static str,
        /// Raw value found.
        value: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::LimitsOutOfOrder { .. } => "config_limits_out_of_order",
            ConfigError::ZeroLimit => "config_zero_limit",
            ConfigError::InvalidValue { .. } => "config_invalid_value",
        }
    }
}

/// # Errors produced by a coordinator dispatch round.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The coordinator has no worker links.
    #[error("no workers connected")]
    NoWorkers,

    /// A worker answered with a fatal error; the round was aborted.
    #[error("worker {worker} failed: {reason}")]
    WorkerFatal {
        /// Worker name (address).
        worker: String,
        /// Reason reported by the worker.
        reason: String,
    },

    /// A worker connection closed before it answered.
    #[error("worker {worker} disconnected")]
    Disconnected {
        /// Worker name (address).
        worker: String,
    },

    /// A worker answered with a payload that could not be aggregated.
    #[error("worker {worker} sent malformed result: {source}")]
    Malformed {
        /// Worker name (address).
        worker: String,
        /// Decoding failure.
        #[source]
        source: ProtocolError,
    },

    /// Sending a request to a worker failed.
    #[error("failed to send to worker {worker}: {source}")]
    Send {
        /// Worker name (address).
        worker: String,
        /// Transport failure.
        #[source]
        source: ProtocolError,
    },

    /// Connecting to a worker failed after all attempts.
    #[error("failed to connect to {addr} after {attempts} attempts: {source}")]
    Connect {
        /// Worker address.
        addr: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        #[source]
        source: std::io::Error,
    },

    /// The round was cancelled locally before every worker answered.
    #[error("dispatch round cancelled")]
    Cancelled,

    /// Summing the workers' results overflowed `i64`.
    #[error("aggregate overflow in round {round}")]
    Overflow {
        /// Dispatch round.
        round: u64,
    },

    /// No status reply arrived in time.
    #[error("worker {worker} did not answer status request within {timeout:?}")]
    StatusTimeout {
        /// Worker name (address).
        worker: String,
        /// How long the coordinator waited.
        timeout: Duration,
    },
}

impl DispatchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::NoWorkers => "dispatch_no_workers",
            DispatchError::WorkerFatal { .. } => "dispatch_worker_fatal",
            DispatchError::Disconnected { .. } => "dispatch_disconnected",
            DispatchError::Malformed { .. } => "dispatch_malformed",
            DispatchError::Send { .. } => "dispatch_send",
            DispatchError::Connect { .. } => "dispatch_connect",
            DispatchError::Cancelled => "dispatch_cancelled",
            DispatchError::Overflow { .. } => "dispatch_overflow",
            DispatchError::StatusTimeout { .. } => "dispatch_status_timeout",
        }
    }

    /// Name of the worker responsible for the failure, if any.
    pub fn worker(&self) -> Option<&str> {
        match self {
            DispatchError::WorkerFatal { worker, .. }
            | DispatchError::Disconnected { worker }
            | DispatchError::Malformed { worker, .. }
            | DispatchError::Send { worker, .. }
            | DispatchError::StatusTimeout { worker, .. } => Some(worker),
            DispatchError::Connect { addr, .. } => Some(addr),
            DispatchError::NoWorkers | DispatchError::Cancelled | DispatchError::Overflow { .. } => {
                None
            }
        }
    }
}

/// # Errors produced by the worker runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Binding the listen address failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound.
        addr: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Shutdown grace period was exceeded; some sessions remained stuck.
    #[error("shutdown timeout {grace:?} exceeded; {stuck} sessions still running")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Sessions that did not finish in time.
        stuck: usize,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use workvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: 0 };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Bind { .. } => "runtime_bind",
            RuntimeError::Config(_) => "runtime_config",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}
