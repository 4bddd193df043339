//! # Example: Factorial Worker
//!
//! Serves `int64` factorial requests on `WORKVISOR_HOST:WORKVISOR_PORT`
//! (default `localhost:8000`) until Ctrl-C / SIGTERM.
//!
//! Each multiplication step takes 300ms, so `n >= 17` crosses the default
//! 5s non-critical limit and `n >= 34` would exceed the 10s critical limit.
//!
//! ```text
//! WORKVISOR_PORT=8001 cargo run --example worker
//! WORKVISOR_PORT=8002 cargo run --example worker
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use workvisor::{Config, JobContext, JobError, JobRef, Subscribe, Worker, int64_job};

const STEP: Duration = Duration::from_millis(300);

fn factorial_job() -> JobRef {
    int64_job("factorial", |n: i64, ctx: JobContext| async move {
        if n < 0 {
            return Err(JobError::InvalidInput(format!("factorial of negative number {n}")));
        }
        if n > 20 {
            ctx.warn(format!("{n}! does not fit in 64 bits; expect a failure"));
        }
        let mut acc: i64 = 1;
        for k in 2..=n {
            tokio::select! {
                _ = ctx.cancelled() => return Err(JobError::Fail("cancelled".into())),
                _ = tokio::time::sleep(STEP) => {}
            }
            acc = acc
                .checked_mul(k)
                .ok_or_else(|| JobError::Fail(format!("overflow at step {k}")))?;
        }
        Ok(acc)
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::from_env()?;
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(workvisor::LogWriter)];
    let worker = Worker::bind(cfg, factorial_job(), subs).await?;
    tracing::info!(addr = %worker.local_addr()?, "worker listening");

    worker.run().await?;
    Ok(())
}
