//! # Jobs: the user computation a worker executes.
//!
//! A [`Job`] turns one input [`DataPayload`] into one output payload. It is
//! handed a [`JobContext`] holding the execution's cancellation token and a
//! non-blocking warning sender.
//!
//! [`JobFn`] wraps a closure `F: Fn(DataPayload, JobContext) -> Fut`, producing
//! a fresh future per execution. [`int64_job`] adapts an `i64 -> i64` closure.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use workvisor::{DataPayload, JobContext, JobError, JobFn, JobRef};
//!
//! let echo: JobRef = JobFn::arc("echo", |input: DataPayload, ctx: JobContext| async move {
//!     if ctx.is_cancelled() {
//!         return Err(JobError::Fail("cancelled before start".into()));
//!     }
//!     ctx.warn("echoing");
//!     Ok(input)
//! });
//! assert_eq!(echo.name(), "echo");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::protocol::DataPayload;

/// Boxed future returned by [`Job::spawn`].
pub type BoxJobFuture = Pin<Box<dyn Future<Output = Result<DataPayload, JobError>> + Send + 'static>>;

/// Shared handle to a job.
pub type JobRef = Arc<dyn Job>;

/// # Computation run by a supervisor.
///
/// `spawn` creates a new future per execution; implementations keep no hidden
/// mutable state between runs.
pub trait Job: Send + Sync + 'static {
    /// Stable, human-readable name.
    fn name(&self) -> &str;

    /// Creates the future computing the result for `input`.
    fn spawn(&self, input: DataPayload, ctx: JobContext) -> BoxJobFuture;
}

/// What a running job can see of its execution.
#[derive(Clone, Debug)]
pub struct JobContext {
    token: CancellationToken,
    warnings: mpsc::UnboundedSender<String>,
}

impl JobContext {
    /// Creates a context.
    pub fn new(token: CancellationToken, warnings: mpsc::UnboundedSender<String>) -> Self {
        Self { token, warnings }
    }

    /// Token cancelled when the execution is cancelled, timed out or finished.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// True once the execution has been abandoned.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the execution is abandoned.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Raises a non-fatal warning; never blocks.
    ///
    /// Returns `false` if the execution no longer listens.
    pub fn warn(&self, message: impl Into<String>) -> bool {
        self.warnings.send(message.into()).is_ok()
    }
}

/// Function-backed job.
#[derive(Debug)]
pub struct JobFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> JobFn<F> {
    /// Creates a new function-backed job.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the job and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F, Fut> Job for JobFn<F>
where
    F: Fn(DataPayload, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<DataPayload, JobError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, input: DataPayload, ctx: JobContext) -> BoxJobFuture {
        Box::pin((self.f)(input, ctx))
    }
}

/// Wraps an integer computation as a job over `int64` payloads.
///
/// Inputs that are not `int64` payloads fail with [`JobError::InvalidInput`].
///
/// # Example
/// ```rust
/// use workvisor::{JobContext, JobError, JobRef, int64_job};
///
/// let double: JobRef = int64_job("double", |n: i64, _ctx: JobContext| async move {
///     n.checked_mul(2).ok_or_else(|| JobError::Fail("overflow".into()))
/// });
/// assert_eq!(double.name(), "double");
/// ```
pub fn int64_job<F, Fut>(name: impl Into<Cow<'static, str>>, f: F) -> JobRef
where
    F: Fn(i64, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<i64, JobError>> + Send + 'static,
{
    JobFn::arc(name, move |input: DataPayload, ctx: JobContext| {
        let fut = input.as_int64().map(|n| f(n, ctx));
        async move {
            let value = fut?.await?;
            Ok(DataPayload::int64(value))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_int64_job_round() {
        let job = int64_job("inc", |n: i64, _ctx: JobContext| async move { Ok(n + 1) });
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = JobContext::new(CancellationToken::new(), tx);
        let out = job.spawn(DataPayload::int64(41), ctx).await.unwrap();
        assert_eq!(out.as_int64().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_int64_job_rejects_other_payloads() {
        let job = int64_job("inc", |n: i64, _ctx: JobContext| async move { Ok(n + 1) });
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = JobContext::new(CancellationToken::new(), tx);
        let err = job
            .spawn(DataPayload::new("text/plain", &b"hi"[..]), ctx)
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "job_invalid_input");
    }

    #[test]
    fn test_warn_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = JobContext::new(CancellationToken::new(), tx);
        assert!(ctx.warn("first"));
        drop(rx);
        assert!(!ctx.warn("second"));
    }
}
