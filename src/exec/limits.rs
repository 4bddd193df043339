//! # Execution limits.
//!
//! A run is bounded by two deadlines measured from its start:
//! - **non-critical**: advisory; crossing it raises a warning and the run continues;
//! - **critical**: terminal; crossing it abandons the run as timed out.
//!
//! `0 < non_critical < critical` is enforced at construction.

use std::time::Duration;

use crate::error::ConfigError;

/// Validated pair of deadlines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    non_critical: Duration,
    critical: Duration,
}

impl Limits {
    /// Creates limits, rejecting zero values and `non_critical >= critical`.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use workvisor::Limits;
    ///
    /// assert!(Limits::new(Duration::from_secs(1), Duration::from_secs(2)).is_ok());
    /// assert!(Limits::new(Duration::from_secs(2), Duration::from_secs(2)).is_err());
    /// ```
    pub fn new(non_critical: Duration, critical: Duration) -> Result<Self, ConfigError> {
        if non_critical.is_zero() || critical.is_zero() {
            return Err(ConfigError::ZeroLimit);
        }
        if non_critical >= critical {
            return Err(ConfigError::LimitsOutOfOrder {
                non_critical,
                critical,
            });
        }
        Ok(Self {
            non_critical,
            critical,
        })
    }

    /// Advisory deadline.
    #[inline]
    pub fn non_critical(&self) -> Duration {
        self.non_critical
    }

    /// Terminal deadline.
    #[inline]
    pub fn critical(&self) -> Duration {
        self.critical
    }
}

impl Default for Limits {
    /// 5s non-critical, 10s critical.
    fn default() -> Self {
        Self {
            non_critical: Duration::from_secs(5),
            critical: Duration::from_secs(10),
        }
    }
}

/// What happens to the non-critical deadline after it fires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WarningPolicy {
    /// One warning per run at most.
    #[default]
    Once,
    /// Re-armed every `non_critical` interval until the run ends.
    Repeat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero() {
        assert_eq!(
            Limits::new(Duration::ZERO, Duration::from_secs(1)),
            Err(ConfigError::ZeroLimit)
        );
    }

    #[test]
    fn test_rejects_out_of_order() {
        let err = Limits::new(Duration::from_secs(3), Duration::from_secs(2)).unwrap_err();
        assert_eq!(err.as_label(), "config_limits_out_of_order");
    }
}
