//! # Supervisor status snapshot.
//!
//! Served to `StatusRequest` envelopes as a `Data` envelope with content type
//! [`STATUS_CONTENT_TYPE`] carrying the JSON encoding of [`SupervisorStatus`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::protocol::{DataPayload, STATUS_CONTENT_TYPE};

/// State of the supervisor's current or last execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecState {
    /// Nothing has run since creation or reset.
    Idle,
    /// An execution is in flight.
    Running,
    /// The last execution returned a value.
    Succeeded,
    /// The last execution hit the critical limit.
    TimedOut,
    /// The last execution was cancelled.
    Cancelled,
    /// The last execution's job failed.
    Failed,
}

impl ExecState {
    /// True for the four terminal states.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecState::Idle | ExecState::Running)
    }
}

/// Read-only snapshot of a supervisor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStatus {
    /// Terminal deadline.
    pub critical_limit: Duration,
    /// Advisory deadline.
    pub non_critical_limit: Duration,
    /// Time since the current execution started, or the duration of the last one.
    pub elapsed: Duration,
    /// Current state.
    pub state: ExecState,
}

impl SupervisorStatus {
    /// Encodes the snapshot as a status payload.
    pub fn to_payload(&self) -> Result<DataPayload, ProtocolError> {
        let json = serde_json::to_vec(self)?;
        Ok(DataPayload::new(STATUS_CONTENT_TYPE, json))
    }

    /// Decodes a status payload.
    pub fn from_payload(payload: &DataPayload) -> Result<Self, ProtocolError> {
        if payload.content_type() != STATUS_CONTENT_TYPE {
            return Err(ProtocolError::UnexpectedPayload {
                expected: STATUS_CONTENT_TYPE,
                content_type: payload.content_type().to_string(),
            });
        }
        Ok(serde_json::from_slice(payload.data())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_carries_json() {
        let status = SupervisorStatus {
            critical_limit: Duration::from_secs(2),
            non_critical_limit: Duration::from_secs(1),
            elapsed: Duration::from_millis(1500),
            state: ExecState::Running,
        };
        let payload = status.to_payload().unwrap();
        assert_eq!(payload.content_type(), STATUS_CONTENT_TYPE);
        assert!(std::str::from_utf8(payload.data()).unwrap().contains("\"running\""));
        assert_eq!(SupervisorStatus::from_payload(&payload).unwrap(), status);
    }

    #[test]
    fn test_rejects_other_payloads() {
        let err = SupervisorStatus::from_payload(&DataPayload::int64(1)).unwrap_err();
        assert_eq!(err.as_label(), "protocol_unexpected_payload");

        let garbage = DataPayload::new(STATUS_CONTENT_TYPE, &b"not json"[..]);
        let err = SupervisorStatus::from_payload(&garbage).unwrap_err();
        assert_eq!(err.as_label(), "protocol_invalid_status");
    }
}
