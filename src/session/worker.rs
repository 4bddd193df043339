//! # Worker: accept loop with graceful shutdown.
//!
//! A [`Worker`] owns a bound [`TcpListener`], the job every session runs, the
//! event bus and the subscriber set. Each accepted connection gets its own
//! [`Supervisor`] and [`Session`].
//!
//! ## Flow
//! ```text
//! Worker::bind(cfg, job, subscribers)
//!   └─► serve(token):
//!         loop { accept → spawn Session::run(token.child()) ; reap finished sessions }
//!         token cancelled ─► ShutdownRequested
//!                          └─► wait sessions up to cfg.grace
//!                                ├─ all done → AllStoppedWithin → Ok(())
//!                                └─ timeout  → GraceExceeded    → Err(RuntimeError::GraceExceeded)
//!   └─► run(): serve() cancelled by the first OS termination signal
//! ```
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use workvisor::{Config, JobContext, JobError, LogWriter, Subscribe, Worker, int64_job};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let job = int64_job("square", |n: i64, _ctx: JobContext| async move {
//!         n.checked_mul(n).ok_or_else(|| JobError::Fail("overflow".into()))
//!     });
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
//!     let worker = Worker::bind(Config::from_env()?, job, subs).await?;
//!     worker.run().await?;
//!     Ok(())
//! }
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::exec::{JobRef, Limits, Supervisor};
use crate::subscribers::{Subscribe, SubscriberSet};

use super::connection::Session;
use super::signal::shutdown_signal;

/// TCP accept loop serving one job.
pub struct Worker {
    cfg: Config,
    limits: Limits,
    job: JobRef,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    listener: TcpListener,
}

impl Worker {
    /// Validates `cfg` and binds `cfg.listen_addr()`.
    ///
    /// # Errors
    /// [`RuntimeError::Config`] for invalid limits, [`RuntimeError::Bind`] if the
    /// address cannot be bound.
    pub async fn bind(
        cfg: Config,
        job: JobRef,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Result<Self, RuntimeError> {
        let limits = cfg.limits()?;
        let addr = cfg.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| RuntimeError::Bind { addr, source })?;
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(subscribers, bus.clone()));
        Ok(Self {
            cfg,
            limits,
            job,
            bus,
            subs,
            listener,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The worker's event bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Serves connections until the first OS termination signal.
    pub async fn run(self) -> Result<(), RuntimeError> {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            if let Err(err) = shutdown_signal().await {
                tracing::error!(error = %err, "failed to install signal handlers");
            }
            trigger.cancel();
        });
        self.serve(token).await
    }

    /// Serves connections until `shutdown` is cancelled, then waits up to
    /// `grace` for open sessions.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), RuntimeError> {
        let Worker {
            cfg,
            limits,
            job,
            bus,
            subs,
            listener,
        } = self;

        let events = CancellationToken::new();
        let forwarder = subs.attach(events.clone());
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(err) = stream.set_nodelay(true) {
                            tracing::debug!(%peer, error = %err, "set_nodelay failed");
                        }
                        let name = peer.to_string();
                        let supervisor = Supervisor::new(limits, cfg.warning_policy, bus.clone())
                            .with_name(name.clone());
                        let session = Session::new(stream, supervisor, Arc::clone(&job), bus.clone())
                            .with_peer(name)
                            .with_outbox_capacity(cfg.outbox_capacity);
                        sessions.spawn(session.run(shutdown.child_token()));
                    }
                    Err(err) => tracing::warn!(error = %err, "accept failed"),
                },
                Some(joined) = sessions.join_next() => {
                    if let Ok(Err(err)) = joined {
                        tracing::debug!(error = %err, "session ended with protocol error");
                    }
                }
            }
        }
        drop(listener);

        bus.publish(Event::new(EventKind::ShutdownRequested));
        let result = wait_with_grace(&bus, &mut sessions, cfg.grace).await;

        events.cancel();
        let _ = forwarder.await;
        if let Ok(subs) = Arc::try_unwrap(subs) {
            subs.shutdown().await;
        }
        result
    }
}

async fn wait_with_grace<T: 'static>(
    bus: &Bus,
    sessions: &mut JoinSet<T>,
    grace: std::time::Duration,
) -> Result<(), RuntimeError> {
    let done = async { while sessions.join_next().await.is_some() {} };
    match tokio::time::timeout(grace, done).await {
        Ok(()) => {
            bus.publish(Event::new(EventKind::AllStoppedWithin));
            Ok(())
        }
        Err(_) => {
            let stuck = sessions.len();
            bus.publish(
                Event::new(EventKind::GraceExceeded)
                    .with_reason(format!("{stuck} sessions still running")),
            );
            sessions.abort_all();
            Err(RuntimeError::GraceExceeded { grace, stuck })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_util::codec::Framed;

    use super::*;
    use crate::exec::{JobContext, int64_job};
    use crate::protocol::{Body, DataPayload, Envelope, EnvelopeCodec};

    fn local_config() -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 0,
            non_critical: Duration::from_secs(1),
            critical: Duration::from_secs(2),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_serves_and_stops() {
        let job = int64_job("double", |n: i64, _ctx: JobContext| async move { Ok(n * 2) });
        let worker = Worker::bind(local_config(), job, Vec::new()).await.unwrap();
        let addr = worker.local_addr().unwrap();
        let token = CancellationToken::new();
        let server = tokio::spawn(worker.serve(token.clone()));

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, EnvelopeCodec::default());
        framed.send(Envelope::data(DataPayload::int64(21))).await.unwrap();
        let reply = framed.next().await.unwrap().unwrap().unwrap();
        let Body::Data(payload) = reply.body() else {
            panic!("expected data, got {reply:?}");
        };
        assert_eq!(payload.as_int64().unwrap(), 42);

        token.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_rejects_invalid_limits() {
        let cfg = Config {
            non_critical: Duration::from_secs(3),
            ..local_config()
        };
        let job = int64_job("noop", |n: i64, _ctx: JobContext| async move { Ok(n) });
        let err = Worker::bind(cfg, job, Vec::new()).await.err().unwrap();
        assert_eq!(err.as_label(), "runtime_config");
    }
}
