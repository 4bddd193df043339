//! # Per-round results.

use std::sync::Arc;

use crate::error::DispatchError;
use crate::protocol::DataPayload;

/// One worker's successful reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerOutcome {
    /// Worker name (address).
    pub worker: Arc<str>,
    /// Result payload.
    pub payload: DataPayload,
    /// Non-fatal warnings received before the result, in order.
    pub warnings: Vec<String>,
}

/// Results of a completed dispatch round, in worker order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateResult {
    round: u64,
    outcomes: Vec<WorkerOutcome>,
}

impl AggregateResult {
    pub(crate) fn new(round: u64, outcomes: Vec<WorkerOutcome>) -> Self {
        Self { round, outcomes }
    }

    /// Dispatch round number (starts at 1).
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Per-worker outcomes.
    pub fn outcomes(&self) -> &[WorkerOutcome] {
        &self.outcomes
    }

    /// Consumes the result, returning the outcomes.
    pub fn into_outcomes(self) -> Vec<WorkerOutcome> {
        self.outcomes
    }

    /// Sum of every outcome interpreted as an `int64` payload.
    ///
    /// # Errors
    /// [`DispatchError::Malformed`] naming the first worker whose payload is not
    /// `int64`, or [`DispatchError::Overflow`].
    pub fn total(&self) -> Result<i64, DispatchError> {
        self.outcomes.iter().try_fold(0i64, |acc, outcome| {
            let value = outcome
                .payload
                .as_int64()
                .map_err(|source| DispatchError::Malformed {
                    worker: outcome.worker.to_string(),
                    source,
                })?;
            acc.checked_add(value)
                .ok_or(DispatchError::Overflow { round: self.round })
        })
    }
}
