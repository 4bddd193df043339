//! # Runtime configuration.
//!
//! [`Config`] gathers every tunable of the worker and coordinator runtimes.
//!
//! Config is used in three places:
//! 1. **Supervisor creation**: [`Supervisor::from_config`](crate::Supervisor::from_config)
//! 2. **Worker accept loop**: [`Worker::bind`](crate::Worker::bind) (listen address, grace, outbox)
//! 3. **Coordinator connects**: [`Coordinator::connect`](crate::Coordinator::connect) (timeout, attempts, backoff)
//!
//! ## Environment overrides
//! [`Config::from_env`] starts from [`Config::default`] and applies:
//!
//! | Variable                    | Field          | Format            |
//! |-----------------------------|----------------|-------------------|
//! | `WORKVISOR_NON_CRITICAL_MS` | `non_critical` | milliseconds      |
//! | `WORKVISOR_CRITICAL_MS`     | `critical`     | milliseconds      |
//! | `WORKVISOR_HOST`            | `host`         | string            |
//! | `WORKVISOR_PORT`            | `port`         | `u16`             |
//! | `WORKVISOR_REARM`           | `warning_policy` | `once` / `repeat` |

use std::time::Duration;

use crate::error::ConfigError;
use crate::exec::{Limits, WarningPolicy};
use crate::policies::BackoffPolicy;

const ENV_NON_CRITICAL: &str = "WORKVISOR_NON_CRITICAL_MS";
const ENV_CRITICAL: &str = "WORKVISOR_CRITICAL_MS";
const ENV_HOST: &str = "WORKVISOR_HOST";
const ENV_PORT: &str = "WORKVISOR_PORT";
const ENV_REARM: &str = "WORKVISOR_REARM";

/// Configuration for workers and coordinators.
///
/// ## Field semantics
/// - `non_critical` / `critical`: execution limits (`0 < non_critical < critical`)
/// - `warning_policy`: whether the non-critical warning re-arms
/// - `host` / `port`: worker listen address
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `outbox_capacity`: per-session queue of outbound envelopes
/// - `grace`: how long a stopping worker waits for its sessions
/// - `connect_*`: coordinator connection retries
#[derive(Clone, Debug)]
pub struct Config {
    /// Advisory limit; a warning is emitted when a run exceeds it.
    pub non_critical: Duration,
    /// Terminal limit; a run still going at this point is abandoned.
    pub critical: Duration,
    /// Re-arm behavior of the non-critical deadline.
    pub warning_policy: WarningPolicy,
    /// Listen host for workers.
    pub host: String,
    /// Listen port for workers.
    pub port: u16,
    /// Capacity of the event bus broadcast channel.
    pub bus_capacity: usize,
    /// Capacity of each session's outbound envelope queue.
    pub outbox_capacity: usize,
    /// Maximum time to wait for sessions after shutdown is requested.
    ///
    /// Exceeding it returns `RuntimeError::GraceExceeded`.
    pub grace: Duration,
    /// Per-attempt connect timeout.
    pub connect_timeout: Duration,
    /// Number of connect attempts before giving up (min 1).
    pub connect_attempts: u32,
    /// Delay schedule between connect attempts.
    pub connect_backoff: BackoffPolicy,
}

impl Config {
    /// Default configuration with environment overrides applied.
    ///
    /// # Errors
    /// [`ConfigError::InvalidValue`] if a variable is set but unparsable, or any
    /// [`validate`](Self::validate) failure.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = lookup(ENV_NON_CRITICAL) {
            cfg.non_critical = parse_millis(ENV_NON_CRITICAL, &v)?;
        }
        if let Some(v) = lookup(ENV_CRITICAL) {
            cfg.critical = parse_millis(ENV_CRITICAL, &v)?;
        }
        if let Some(v) = lookup(ENV_HOST) {
            cfg.host = v;
        }
        if let Some(v) = lookup(ENV_PORT) {
            cfg.port = v.trim().parse().map_err(|_| invalid(ENV_PORT, &v))?;
        }
        if let Some(v) = lookup(ENV_REARM) {
            cfg.warning_policy = match v.trim().to_ascii_lowercase().as_str() {
                "once" => WarningPolicy::Once,
                "repeat" => WarningPolicy::Repeat,
                _ => return Err(invalid(ENV_REARM, &v)),
            };
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks the execution limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits().map(|_| ())
    }

    /// Validated execution limits.
    pub fn limits(&self) -> Result<Limits, ConfigError> {
        Limits::new(self.non_critical, self.critical)
    }

    /// `host:port` listen address.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `non_critical = 5s`, `critical = 10s`, `WarningPolicy::Once`
    /// - `localhost:8000`
    /// - `bus_capacity = 1024`, `outbox_capacity = 64`
    /// - `grace = 5s`
    /// - `connect_timeout = 3s`, `connect_attempts = 3`, constant 100ms backoff
    fn default() -> Self {
        Self {
            non_critical: Duration::from_secs(5),
            critical: Duration::from_secs(10),
            warning_policy: WarningPolicy::Once,
            host: "localhost".to_string(),
            port: 8000,
            bus_capacity: 1024,
            outbox_capacity: 64,
            grace: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(3),
            connect_attempts: 3,
            connect_backoff: BackoffPolicy::constant(Duration::from_millis(100)),
        }
    }
}

fn parse_millis(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| invalid(key, raw))
}

fn invalid(key: &'static str, raw: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    }
}
