//! # Coordinator: dispatch rounds over a fixed set of workers.
//!
//! Rounds are serialized: a second `dispatch` waits for the first to finish.
//! Each round gets its own cancellation scope, observed by every per-worker
//! waiter. The scope only stops the coordinator's waiting; remote executions
//! are stopped by an explicit `CancelRequest` to every still-pending worker.
//!
//! ## Events
//! `DispatchStarted` → `WorkerReplied`* / `WorkerWarned`* → `DispatchCompleted`
//! or `CancelSent`* → `DispatchAborted`.
//!
//! ## Example
//! ```no_run
//! use workvisor::{Bus, Config, Coordinator};
//!
//! # async fn demo() -> Result<(), workvisor::DispatchError> {
//! let cfg = Config::default();
//! let coordinator = Coordinator::connect(&["127.0.0.1:8001", "127.0.0.1:8002"], &cfg, Bus::default()).await?;
//! let total = coordinator.dispatch_int64(5).await?;
//! println!("sum = {total}");
//! # Ok(())
//! # }
//! ```

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{DispatchError, ProtocolError};
use crate::events::{Bus, Event, EventKind};
use crate::exec::SupervisorStatus;
use crate::protocol::{Body, DataPayload, Envelope, STATUS_CONTENT_TYPE};

use super::aggregate::{AggregateResult, WorkerOutcome};
use super::link::{LinkState, WorkerLink};

type Reply = Result<Option<WorkerOutcome>, DispatchError>;

const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(3);

/// Fans one input out to every worker and aggregates the replies.
pub struct Coordinator {
    links: Vec<Arc<WorkerLink>>,
    bus: Bus,
    rounds: AtomicU64,
    gate: tokio::sync::Mutex<()>,
    current: std::sync::Mutex<Option<CancellationToken>>,
    status_timeout: Duration,
}

impl Coordinator {
    /// Connects to every address in order, retrying each per `cfg`.
    ///
    /// # Errors
    /// [`DispatchError::Connect`] for the first address that stays unreachable.
    pub async fn connect<A: AsRef<str>>(
        addrs: &[A],
        cfg: &Config,
        bus: Bus,
    ) -> Result<Self, DispatchError> {
        let mut links = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let addr = addr.as_ref();
            let stream = connect_with_retry(addr, cfg).await?;
            if let Err(err) = stream.set_nodelay(true) {
                tracing::debug!(worker = addr, error = %err, "set_nodelay failed");
            }
            links.push(WorkerLink::new(addr, stream));
        }
        Ok(Self::from_links(links, bus).with_status_timeout(cfg.connect_timeout))
    }

    /// Builds a coordinator over already-open streams (named by the caller).
    pub fn from_streams<I, N, S>(streams: I, bus: Bus) -> Self
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<Arc<str>>,
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let links = streams
            .into_iter()
            .map(|(name, stream)| WorkerLink::new(name, stream))
            .collect();
        Self::from_links(links, bus)
    }

    fn from_links(links: Vec<WorkerLink>, bus: Bus) -> Self {
        Self {
            links: links.into_iter().map(Arc::new).collect(),
            bus,
            rounds: AtomicU64::new(0),
            gate: tokio::sync::Mutex::new(()),
            current: std::sync::Mutex::new(None),
            status_timeout: DEFAULT_STATUS_TIMEOUT,
        }
    }

    /// Sets how long [`statuses`](Self::statuses) waits for each worker.
    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }

    /// The coordinator's event bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Worker names, in dispatch order.
    pub fn workers(&self) -> Vec<Arc<str>> {
        self.links.iter().map(|l| Arc::clone(l.name())).collect()
    }

    /// Connection bookkeeping per worker.
    pub fn link_states(&self) -> Vec<LinkState> {
        self.links.iter().map(|l| l.state()).collect()
    }

    /// Sends `input` to every worker and waits for all results.
    ///
    /// # Errors
    /// The first fatal reply, disconnect or send failure aborts the round:
    /// every worker that has not answered yet receives a `CancelRequest`.
    /// [`DispatchError::Cancelled`] if [`cancel_all`](Self::cancel_all) stopped the round.
    pub async fn dispatch(&self, input: DataPayload) -> Result<AggregateResult, DispatchError> {
        if self.links.is_empty() {
            return Err(DispatchError::NoWorkers);
        }
        let _gate = self.gate.lock().await;
        let round = self.rounds.fetch_add(1, Ordering::AcqRel) + 1;
        let scope = CancellationToken::new();
        *self.current() = Some(scope.clone());

        self.bus
            .publish(Event::new(EventKind::DispatchStarted).with_round(round));
        let result = self.run_round(round, &scope, input).await;
        *self.current() = None;

        match &result {
            Ok(_) => self
                .bus
                .publish(Event::new(EventKind::DispatchCompleted).with_round(round)),
            Err(err) => {
                let mut ev = Event::new(EventKind::DispatchAborted)
                    .with_round(round)
                    .with_reason(err.to_string());
                if let Some(worker) = err.worker() {
                    ev = ev.with_source(worker);
                }
                self.bus.publish(ev);
            }
        }
        result
    }

    /// Dispatches an `int64` input and sums the `int64` results.
    pub async fn dispatch_int64(&self, value: i64) -> Result<i64, DispatchError> {
        self.dispatch(DataPayload::int64(value)).await?.total()
    }

    /// Asks every worker for its supervisor status.
    pub async fn statuses(&self) -> Vec<(Arc<str>, Result<SupervisorStatus, DispatchError>)> {
        let queries = self.links.iter().map(|link| async move {
            (Arc::clone(link.name()), self.query_status(link).await)
        });
        futures::future::join_all(queries).await
    }

    /// Stops remote work.
    ///
    /// During a round this cancels the round, which then sends `CancelRequest`
    /// to every pending worker. Otherwise `CancelRequest` goes to every
    /// connected worker.
    pub async fn cancel_all(&self) {
        let scope = self.current().clone();
        if let Some(scope) = scope {
            scope.cancel();
            return;
        }
        for link in self.links.iter().filter(|l| l.is_connected()) {
            self.send_cancel(link, None).await;
        }
    }

    async fn run_round(
        &self,
        round: u64,
        scope: &CancellationToken,
        input: DataPayload,
    ) -> Result<AggregateResult, DispatchError> {
        let mut waiters: JoinSet<(usize, Reply)> = JoinSet::new();
        let mut pending = vec![false; self.links.len()];

        for (index, link) in self.links.iter().enumerate() {
            if let Err(err) = link.send_request(Envelope::data(input.clone())).await {
                return Err(self.abort(round, scope, &mut waiters, &pending, err).await);
            }
            pending[index] = true;
            let (link, scope, bus) = (Arc::clone(link), scope.clone(), self.bus.clone());
            waiters.spawn(async move { (index, await_reply(link, scope, bus, round).await) });
        }

        let mut outcomes: Vec<Option<WorkerOutcome>> = vec![None; self.links.len()];
        while let Some(joined) = waiters.join_next().await {
            let (index, reply) = match joined {
                Ok(joined) => joined,
                Err(err) => {
                    tracing::error!(round, error = %err, "reply waiter failed");
                    let reason = DispatchError::Cancelled;
                    return Err(self.abort(round, scope, &mut waiters, &pending, reason).await);
                }
            };
            match reply {
                Ok(Some(outcome)) => {
                    pending[index] = false;
                    self.bus.publish(
                        Event::new(EventKind::WorkerReplied)
                            .with_source(Arc::clone(&outcome.worker))
                            .with_round(round),
                    );
                    outcomes[index] = Some(outcome);
                }
                Ok(None) => {
                    let reason = DispatchError::Cancelled;
                    return Err(self.abort(round, scope, &mut waiters, &pending, reason).await);
                }
                Err(err) => {
                    // A malformed reply may have been a warning: cancel the worker too.
                    if !matches!(err, DispatchError::Malformed { .. }) {
                        pending[index] = false;
                    }
                    return Err(self.abort(round, scope, &mut waiters, &pending, err).await);
                }
            }
        }

        Ok(AggregateResult::new(round, outcomes.into_iter().flatten().collect()))
    }

    async fn abort(
        &self,
        round: u64,
        scope: &CancellationToken,
        waiters: &mut JoinSet<(usize, Reply)>,
        pending: &[bool],
        err: DispatchError,
    ) -> DispatchError {
        scope.cancel();
        waiters.abort_all();
        for (link, _) in self.links.iter().zip(pending).filter(|(_, p)| **p) {
            self.send_cancel(link, Some(round)).await;
        }
        err
    }

    async fn send_cancel(&self, link: &WorkerLink, round: Option<u64>) {
        match link.send(Envelope::cancel_request()).await {
            Ok(()) => {
                let mut ev = Event::new(EventKind::CancelSent).with_source(Arc::clone(link.name()));
                if let Some(round) = round {
                    ev = ev.with_round(round);
                }
                self.bus.publish(ev);
            }
            Err(err) => tracing::warn!(worker = %link.name(), error = %err, "cancel request not sent"),
        }
    }

    async fn query_status(&self, link: &WorkerLink) -> Result<SupervisorStatus, DispatchError> {
        let worker = || link.name().to_string();
        let mut replies = link.statuses().await;
        while replies.try_recv().is_ok() {}

        let tag = link.next_status_tag();
        link.send(Envelope::status_request_at(tag)).await?;
        let answer = async {
            // Late replies to earlier, timed-out queries carry older tags.
            loop {
                match replies.recv().await {
                    Some(envelope) if envelope.timestamp() == tag => break Some(envelope),
                    Some(_) => continue,
                    None => break None,
                }
            }
        };
        match tokio::time::timeout(self.status_timeout, answer).await {
            Ok(Some(envelope)) => match envelope.into_body() {
                Body::Data(payload) => SupervisorStatus::from_payload(&payload)
                    .map_err(|source| DispatchError::Malformed { worker: worker(), source }),
                _ => Err(DispatchError::Malformed {
                    worker: worker(),
                    source: ProtocolError::UnexpectedPayload {
                        expected: STATUS_CONTENT_TYPE,
                        content_type: String::new(),
                    },
                }),
            },
            Ok(None) => Err(DispatchError::Disconnected { worker: worker() }),
            Err(_) => Err(DispatchError::StatusTimeout {
                worker: worker(),
                timeout: self.status_timeout,
            }),
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Waits for `link`'s terminal reply to the current round.
///
/// Returns `Ok(None)` if the round scope is cancelled first.
async fn await_reply(
    link: Arc<WorkerLink>,
    scope: CancellationToken,
    bus: Bus,
    round: u64,
) -> Reply {
    let mut responses = link.responses().await;
    let mut warnings = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = scope.cancelled() => return Ok(None),
            next = responses.recv() => next,
        };
        let envelope = match next {
            Some(Ok(envelope)) => envelope,
            Some(Err(source)) => {
                if link.settle() {
                    warnings.clear();
                    continue;
                }
                return Err(DispatchError::Malformed {
                    worker: link.name().to_string(),
                    source,
                });
            }
            None => {
                return Err(DispatchError::Disconnected {
                    worker: link.name().to_string(),
                });
            }
        };
        match envelope.into_body() {
            Body::NonFatalError(warning) => {
                bus.publish(
                    Event::new(EventKind::WorkerWarned)
                        .with_source(Arc::clone(link.name()))
                        .with_round(round)
                        .with_reason(warning.message()),
                );
                warnings.push(warning.message().to_string());
            }
            Body::Data(payload) => {
                if link.settle() {
                    warnings.clear();
                    continue;
                }
                return Ok(Some(WorkerOutcome {
                    worker: Arc::clone(link.name()),
                    payload,
                    warnings,
                }));
            }
            Body::FatalError(error) => {
                if link.settle() {
                    warnings.clear();
                    continue;
                }
                return Err(DispatchError::WorkerFatal {
                    worker: link.name().to_string(),
                    reason: error.message().to_string(),
                });
            }
            Body::CancelRequest | Body::StatusRequest(_) => {
                tracing::warn!(worker = %link.name(), "ignoring request sent by worker");
            }
        }
    }
}

async fn connect_with_retry(addr: &str, cfg: &Config) -> Result<TcpStream, DispatchError> {
    let attempts = cfg.connect_attempts.max(1);
    let mut last = None;
    for attempt in 0..attempts {
        match tokio::time::timeout(cfg.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(err)) => last = Some(err),
            Err(_) => last = Some(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        }
        if attempt + 1 < attempts {
            let delay = cfg.connect_backoff.next(attempt);
            tracing::debug!(worker = addr, attempt, ?delay, "connect failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }
    Err(DispatchError::Connect {
        addr: addr.to_string(),
        attempts,
        source: last.unwrap_or_else(|| io::Error::other("no connect attempt made")),
    })
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use futures::{SinkExt, StreamExt};
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio_util::codec::Framed;

    use super::*;
    use crate::protocol::{EnvelopeCodec, Kind};

    type Fake = Framed<DuplexStream, EnvelopeCodec>;

    fn pair(names: &[&'static str]) -> (Coordinator, Vec<Fake>) {
        let mut streams = Vec::new();
        let mut fakes = Vec::new();
        for name in names {
            let (a, b) = tokio::io::duplex(16 * 1024);
            streams.push((*name, a));
            fakes.push(Framed::new(b, EnvelopeCodec::default()));
        }
        (Coordinator::from_streams(streams, Bus::new(64)), fakes)
    }

    async fn expect_kind(fake: &mut Fake, kind: Kind) -> Envelope {
        let env = fake.next().await.unwrap().unwrap().unwrap();
        assert_eq!(env.kind(), kind);
        env
    }

    #[tokio::test]
    async fn test_no_workers() {
        let coordinator = Coordinator::from_streams(Vec::<(&str, DuplexStream)>::new(), Bus::new(8));
        assert!(matches!(
            coordinator.dispatch_int64(1).await,
            Err(DispatchError::NoWorkers)
        ));
    }

    #[tokio::test]
    async fn test_sums_every_reply() {
        let (coordinator, mut fakes) = pair(&["w1", "w2"]);
        let workers = tokio::spawn(async move {
            for (i, fake) in fakes.iter_mut().enumerate() {
                expect_kind(fake, Kind::Data).await;
                fake.send(Envelope::non_fatal("slow")).await.unwrap();
                fake.send(Envelope::data(DataPayload::int64(10 * (i as i64 + 1))))
                    .await
                    .unwrap();
            }
            fakes
        });
        let agg = coordinator.dispatch(DataPayload::int64(5)).await.unwrap();
        assert_eq!(agg.total().unwrap(), 30);
        assert_eq!(agg.outcomes()[0].warnings, vec!["slow".to_string()]);
        assert_eq!(&*agg.outcomes()[1].worker, "w2");
        workers.await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_cancels_pending_and_stale_reply_is_skipped() {
        let (coordinator, mut fakes) = pair(&["w1", "w2"]);
        let mut w2 = fakes.pop().unwrap();
        let mut w1 = fakes.pop().unwrap();

        let first = tokio::spawn(async move {
            expect_kind(&mut w1, Kind::Data).await;
            w1.send(Envelope::fatal("boom")).await.unwrap();
            expect_kind(&mut w2, Kind::Data).await;
            expect_kind(&mut w2, Kind::CancelRequest).await;
            w2.send(Envelope::fatal("cancelled")).await.unwrap();
            (w1, w2)
        });
        let err = coordinator.dispatch_int64(5).await.unwrap_err();
        assert_eq!(err.worker(), Some("w1"));
        let (mut w1, mut w2) = first.await.unwrap();

        let second = tokio::spawn(async move {
            expect_kind(&mut w1, Kind::Data).await;
            w1.send(Envelope::data(DataPayload::int64(1))).await.unwrap();
            expect_kind(&mut w2, Kind::Data).await;
            w2.send(Envelope::data(DataPayload::int64(2))).await.unwrap();
            (w1, w2)
        });
        assert_eq!(coordinator.dispatch_int64(5).await.unwrap(), 3);
        assert!(coordinator.link_states().iter().all(|s| s.outstanding == 0));
        second.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_reply_aborts_round() {
        let (coordinator, mut fakes) = pair(&["w1", "w2"]);
        let mut w2 = fakes.pop().unwrap();
        let mut w1 = fakes.pop().unwrap();

        let workers = tokio::spawn(async move {
            expect_kind(&mut w1, Kind::Data).await;
            let mut raw = bytes::BytesMut::new();
            raw.put_u32(9);
            raw.put_u8(42);
            raw.put_i64(0);
            w1.get_mut().write_all(&raw).await.unwrap();
            expect_kind(&mut w1, Kind::CancelRequest).await;
            expect_kind(&mut w2, Kind::Data).await;
            expect_kind(&mut w2, Kind::CancelRequest).await;
            (w1, w2)
        });

        let err = tokio::time::timeout(Duration::from_secs(3), coordinator.dispatch_int64(5))
            .await
            .expect("round must not hang on a malformed reply")
            .unwrap_err();
        assert!(matches!(
            &err,
            DispatchError::Malformed { worker, source: ProtocolError::UnknownKind(42) } if worker == "w1"
        ));
        assert_eq!(coordinator.link_states()[0].outstanding, 0);
        workers.await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_aborts_round() {
        let (coordinator, mut fakes) = pair(&["w1"]);
        let w1 = fakes.pop().unwrap();
        drop(w1);
        let err = coordinator.dispatch_int64(1).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Disconnected { .. } | DispatchError::Send { .. }
        ));
    }

    #[tokio::test]
    async fn test_status_round_trip() {
        let (coordinator, mut fakes) = pair(&["w1"]);
        let mut w1 = fakes.pop().unwrap();
        let fake = tokio::spawn(async move {
            let request = expect_kind(&mut w1, Kind::StatusRequest).await;
            let status = |secs| SupervisorStatus {
                critical_limit: Duration::from_secs(secs),
                non_critical_limit: Duration::from_secs(5),
                elapsed: Duration::ZERO,
                state: crate::exec::ExecState::Idle,
            };
            // A late answer to some earlier query arrives first.
            let stale = Envelope::new(request.timestamp() - 1, Body::Data(status(99).to_payload().unwrap()));
            w1.send(stale).await.unwrap();
            let fresh = Envelope::new(request.timestamp(), Body::Data(status(10).to_payload().unwrap()));
            w1.send(fresh).await.unwrap();
            w1
        });
        let statuses = coordinator.statuses().await;
        assert_eq!(statuses.len(), 1);
        let status = statuses[0].1.as_ref().unwrap();
        assert_eq!(status.critical_limit, Duration::from_secs(10));
        fake.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_timeout() {
        let (coordinator, _fakes) = pair(&["w1"]);
        let coordinator = coordinator.with_status_timeout(Duration::from_millis(200));
        let statuses = coordinator.statuses().await;
        assert!(matches!(
            statuses[0].1,
            Err(DispatchError::StatusTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_all_when_idle() {
        let (coordinator, mut fakes) = pair(&["w1", "w2"]);
        coordinator.cancel_all().await;
        for fake in fakes.iter_mut() {
            expect_kind(fake, Kind::CancelRequest).await;
        }
    }

    #[tokio::test]
    async fn test_connect_gives_up() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let cfg = Config {
            connect_attempts: 2,
            connect_backoff: crate::policies::BackoffPolicy::constant(Duration::from_millis(1)),
            ..Config::default()
        };
        let err = Coordinator::connect(&[addr.as_str()], &cfg, Bus::new(8))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::Connect { attempts: 2, .. }));
    }
}
