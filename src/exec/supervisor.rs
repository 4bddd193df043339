//! # Supervisor: one job at a time under non-critical / critical deadlines.
//!
//! A [`Supervisor`] admits at most one execution at a time. Admission
//! ([`Supervisor::try_start`]) is synchronous and atomic, so two callers can
//! never both observe `Idle`. The returned [`Execution`] drives the run.
//!
//! ## Run loop
//! ```text
//! spawn job ──► select! (biased) {
//!                  cancel.cancelled()        → Cancelled
//!                  job warning               → forward, keep waiting
//!                  job result                → Succeeded / Failed
//!                  critical deadline         → TimedOut
//!                  non-critical deadline     → forward warning, disarm or re-arm
//!               }
//!               └─► cancel job token, record terminal state, publish events
//! ```
//!
//! ## Rules
//! - Publishes **exactly one** terminal event per run: `ExecutionSucceeded`,
//!   `ExecutionFailed` or `ExecutionCancelled`.
//! - `TimeoutHit` is published **in addition to** `ExecutionFailed` on timeout.
//! - The job's result travels over a `oneshot`; once the run ends the job's
//!   future is dropped at its next await point and a late result is discarded.
//! - Status is kept behind one mutex; [`Supervisor::status`] never waits on the run.
//! - Dropping an [`Execution`] before it finishes records `Cancelled`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{ConfigError, ExecError};
use crate::events::{Bus, Event, EventKind};
use crate::protocol::DataPayload;

use super::job::{JobContext, JobRef};
use super::limits::{Limits, WarningPolicy};
use super::status::{ExecState, SupervisorStatus};

/// Non-fatal warning raised during a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Warning {
    /// The non-critical limit elapsed while the job was still running.
    LimitExceeded {
        /// The non-critical limit.
        limit: Duration,
        /// Time since the run started.
        elapsed: Duration,
    },
    /// The job raised a warning through its context.
    Job(String),
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::LimitExceeded { limit, elapsed } => write!(
                f,
                "non-critical limit {limit:?} exceeded: still running after {elapsed:?}"
            ),
            Warning::Job(msg) => f.write_str(msg),
        }
    }
}

#[derive(Debug)]
struct Progress {
    state: ExecState,
    started: Option<Instant>,
    elapsed: Duration,
}

#[derive(Debug)]
struct Shared {
    limits: Limits,
    policy: WarningPolicy,
    bus: Bus,
    name: Arc<str>,
    progress: Mutex<Progress>,
}

impl Shared {
    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, state: ExecState, elapsed: Duration) {
        let mut p = self.progress();
        p.state = state;
        p.elapsed = elapsed;
        p.started = None;
    }
}

/// Admission and status for one execution at a time.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone, Debug)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    /// Creates an idle supervisor.
    pub fn new(limits: Limits, policy: WarningPolicy, bus: Bus) -> Self {
        Self {
            shared: Arc::new(Shared {
                limits,
                policy,
                bus,
                name: Arc::from("supervisor"),
                progress: Mutex::new(Progress {
                    state: ExecState::Idle,
                    started: None,
                    elapsed: Duration::ZERO,
                }),
            }),
        }
    }

    /// Creates a supervisor from validated configuration limits.
    pub fn from_config(cfg: &Config, bus: Bus) -> Result<Self, ConfigError> {
        Ok(Self::new(cfg.limits()?, cfg.warning_policy, bus))
    }

    /// Sets the name used as event source (for example the peer address).
    ///
    /// Only meaningful before the supervisor is cloned.
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.name = name.into();
        }
        self
    }

    /// Event source name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Configured limits.
    pub fn limits(&self) -> Limits {
        self.shared.limits
    }

    /// Snapshot of the current or last execution.
    ///
    /// While running, `elapsed` is measured live.
    pub fn status(&self) -> SupervisorStatus {
        let p = self.shared.progress();
        let elapsed = match (p.state, p.started) {
            (ExecState::Running, Some(started)) => started.elapsed(),
            _ => p.elapsed,
        };
        SupervisorStatus {
            critical_limit: self.shared.limits.critical(),
            non_critical_limit: self.shared.limits.non_critical(),
            elapsed,
            state: p.state,
        }
    }

    /// True while an execution is in flight.
    pub fn is_running(&self) -> bool {
        self.shared.progress().state == ExecState::Running
    }

    /// Returns a finished supervisor to `Idle`; no effect while running.
    pub fn reset(&self) {
        let mut p = self.shared.progress();
        if p.state != ExecState::Running {
            p.state = ExecState::Idle;
            p.started = None;
            p.elapsed = Duration::ZERO;
        }
    }

    /// Admits a new execution.
    ///
    /// # Errors
    /// [`ExecError::Busy`] if an execution is still in flight.
    pub fn try_start(&self) -> Result<Execution, ExecError> {
        let started = Instant::now();
        {
            let mut p = self.shared.progress();
            if p.state == ExecState::Running {
                drop(p);
                let name = Arc::clone(&self.shared.name);
                self.shared
                    .bus
                    .publish(Event::new(EventKind::ExecutionRejected).with_source(name));
                return Err(ExecError::Busy);
            }
            p.state = ExecState::Running;
            p.started = Some(started);
            p.elapsed = Duration::ZERO;
        }
        self.shared.bus.publish(
            Event::new(EventKind::ExecutionStarting)
                .with_source(Arc::clone(&self.shared.name))
                .with_limit(self.shared.limits.critical()),
        );
        Ok(Execution {
            shared: Arc::clone(&self.shared),
            started,
            finished: false,
        })
    }

    /// Admits and drives one execution to its terminal state.
    pub async fn run(
        &self,
        job: &JobRef,
        input: DataPayload,
        cancel: CancellationToken,
        warnings: mpsc::UnboundedSender<Warning>,
    ) -> Result<DataPayload, ExecError> {
        self.try_start()?.run(job, input, cancel, warnings).await
    }
}

/// An admitted execution; consumed by [`Execution::run`].
#[derive(Debug)]
pub struct Execution {
    shared: Arc<Shared>,
    started: Instant,
    finished: bool,
}

impl Execution {
    /// Runs `job` on `input` until the first terminal event.
    ///
    /// Warnings are sent on `warnings` as they occur; a closed receiver is ignored.
    /// Returns the job's value, or [`ExecError::Canceled`], [`ExecError::Timeout`]
    /// or [`ExecError::Failed`].
    pub async fn run(
        mut self,
        job: &JobRef,
        input: DataPayload,
        cancel: CancellationToken,
        warnings: mpsc::UnboundedSender<Warning>,
    ) -> Result<DataPayload, ExecError> {
        let limits = self.shared.limits;
        let job_token = cancel.child_token();
        let (job_warn_tx, mut job_warn_rx) = mpsc::unbounded_channel::<String>();
        let (result_tx, mut result_rx) = oneshot::channel();

        let fut = job.spawn(input, JobContext::new(job_token.clone(), job_warn_tx));
        let guard = job_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                res = fut => { let _ = result_tx.send(res); }
                _ = guard.cancelled() => {}
            }
        });

        let critical_at = self.started + limits.critical();
        let mut warn_at = self.started + limits.non_critical();
        let mut armed = true;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break Err(ExecError::Canceled),

                Some(msg) = job_warn_rx.recv() => {
                    self.warn(&warnings, Warning::Job(msg));
                }

                res = &mut result_rx => break match res {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(ExecError::Failed { reason: err.to_string() }),
                    Err(_) => Err(ExecError::Failed {
                        reason: "job ended without reporting a result".to_string(),
                    }),
                },

                _ = sleep_until(critical_at) => break Err(ExecError::Timeout { limit: limits.critical() }),

                _ = sleep_until(warn_at), if armed => {
                    let elapsed = self.started.elapsed();
                    self.warn(&warnings, Warning::LimitExceeded { limit: limits.non_critical(), elapsed });
                    match self.shared.policy {
                        WarningPolicy::Once => armed = false,
                        WarningPolicy::Repeat => warn_at += limits.non_critical(),
                    }
                }
            }
        };

        job_token.cancel();
        self.record(&outcome);
        outcome
    }

    fn warn(&self, warnings: &mpsc::UnboundedSender<Warning>, warning: Warning) {
        self.shared.bus.publish(
            Event::new(EventKind::WarningRaised)
                .with_source(Arc::clone(&self.shared.name))
                .with_reason(warning.to_string())
                .with_elapsed(self.started.elapsed()),
        );
        let _ = warnings.send(warning);
    }

    fn record(&mut self, outcome: &Result<DataPayload, ExecError>) {
        let elapsed = self.started.elapsed();
        let source = Arc::clone(&self.shared.name);
        let bus = &self.shared.bus;
        let state = match outcome {
            Ok(_) => {
                bus.publish(
                    Event::new(EventKind::ExecutionSucceeded)
                        .with_source(source)
                        .with_elapsed(elapsed),
                );
                ExecState::Succeeded
            }
            Err(err) if !err.is_fatal() => {
                bus.publish(
                    Event::new(EventKind::ExecutionCancelled)
                        .with_source(source)
                        .with_elapsed(elapsed),
                );
                ExecState::Cancelled
            }
            Err(err) => {
                let timed_out = matches!(err, ExecError::Timeout { .. });
                if let ExecError::Timeout { limit } = err {
                    bus.publish(
                        Event::new(EventKind::TimeoutHit)
                            .with_source(Arc::clone(&source))
                            .with_limit(*limit)
                            .with_elapsed(elapsed),
                    );
                }
                bus.publish(
                    Event::new(EventKind::ExecutionFailed)
                        .with_source(source)
                        .with_reason(err.to_string())
                        .with_elapsed(elapsed),
                );
                if timed_out {
                    ExecState::TimedOut
                } else {
                    ExecState::Failed
                }
            }
        };
        self.shared.finish(state, elapsed);
        self.finished = true;
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        if !self.finished {
            self.record(&Err(ExecError::Canceled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::exec::JobFn;

    fn supervisor(policy: WarningPolicy) -> Supervisor {
        let limits = Limits::new(Duration::from_secs(1), Duration::from_secs(2)).unwrap();
        Supervisor::new(limits, policy, Bus::new(64))
    }

    fn sleeper(delay: Duration, value: i64) -> JobRef {
        JobFn::arc("sleeper", move |_input: DataPayload, _ctx: JobContext| async move {
            tokio::time::sleep(delay).await;
            Ok(DataPayload::int64(value))
        })
    }

    async fn run(
        sup: &Supervisor,
        job: &JobRef,
    ) -> (Result<DataPayload, ExecError>, Vec<Warning>, Duration) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        let res = sup
            .run(job, DataPayload::default(), CancellationToken::new(), tx)
            .await;
        let took = start.elapsed();
        let mut warnings = Vec::new();
        while let Ok(w) = rx.try_recv() {
            warnings.push(w);
        }
        (res, warnings, took)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_job_succeeds_without_warnings() {
        let sup = supervisor(WarningPolicy::Once);
        let (res, warnings, _) = run(&sup, &sleeper(Duration::from_millis(500), 5)).await;
        assert_eq!(res.unwrap().as_int64().unwrap(), 5);
        assert!(warnings.is_empty());
        assert_eq!(sup.status().state, ExecState::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_job_warns_once_then_succeeds() {
        let sup = supervisor(WarningPolicy::Once);
        let (res, warnings, _) = run(&sup, &sleeper(Duration::from_millis(1500), 7)).await;
        assert_eq!(res.unwrap().as_int64().unwrap(), 7);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(warnings[0], Warning::LimitExceeded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_at_critical_limit() {
        let sup = supervisor(WarningPolicy::Once);
        let (res, warnings, took) = run(&sup, &sleeper(Duration::from_secs(3), 1)).await;
        assert_eq!(
            res.unwrap_err(),
            ExecError::Timeout {
                limit: Duration::from_secs(2)
            }
        );
        assert_eq!(warnings.len(), 1);
        assert!(took >= Duration::from_secs(2) && took < Duration::from_secs(3));
        assert_eq!(sup.status().state, ExecState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_policy_rearms() {
        let limits = Limits::new(Duration::from_millis(300), Duration::from_secs(1)).unwrap();
        let sup = Supervisor::new(limits, WarningPolicy::Repeat, Bus::new(64));
        let (res, warnings, _) = run(&sup, &sleeper(Duration::from_millis(950), 1)).await;
        assert!(res.is_ok());
        assert_eq!(warnings.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wins() {
        let sup = supervisor(WarningPolicy::Once);
        let token = CancellationToken::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let job = sleeper(Duration::from_secs(5), 1);
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });
        let res = sup.run(&job, DataPayload::default(), token, tx).await;
        assert_eq!(res.unwrap_err(), ExecError::Canceled);
        assert_eq!(sup.status().state, ExecState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_failure_and_job_warnings() {
        let sup = supervisor(WarningPolicy::Once);
        let job: JobRef = JobFn::arc("failing", |_input: DataPayload, ctx: JobContext| async move {
            ctx.warn("almost there");
            Err(JobError::Fail("boom".into()))
        });
        let (res, warnings, _) = run(&sup, &job).await;
        assert_eq!(res.unwrap_err(), ExecError::Failed { reason: "boom".into() });
        assert_eq!(warnings, vec![Warning::Job("almost there".into())]);
        assert_eq!(sup.status().state, ExecState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_while_running() {
        let sup = supervisor(WarningPolicy::Once);
        let exec = sup.try_start().unwrap();
        assert!(sup.is_running());
        assert_eq!(sup.try_start().unwrap_err(), ExecError::Busy);

        drop(exec);
        assert_eq!(sup.status().state, ExecState::Cancelled);
        assert!(sup.try_start().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_elapsed_is_live() {
        let sup = supervisor(WarningPolicy::Once);
        let job = sleeper(Duration::from_millis(1500), 1);
        let runner = sup.clone();
        let handle = tokio::spawn(async move {
            let (tx, _rx) = mpsc::unbounded_channel();
            runner
                .run(&job, DataPayload::default(), CancellationToken::new(), tx)
                .await
        });
        tokio::time::sleep(Duration::from_millis(700)).await;
        let status = sup.status();
        assert_eq!(status.state, ExecState::Running);
        assert!(status.elapsed >= Duration::from_millis(700));
        handle.await.unwrap().unwrap();

        sup.reset();
        assert_eq!(sup.status().state, ExecState::Idle);
    }
}
