//! # Session: one connection, one supervisor.
//!
//! A [`Session`] reads envelopes from its stream and dispatches them by kind:
//!
//! | Inbound          | Action                                                     | Reply                          |
//! |------------------|------------------------------------------------------------|--------------------------------|
//! | `StatusRequest`  | snapshot the supervisor                                    | `Data` (`raw/status` JSON), stamped with the request's timestamp |
//! | `CancelRequest`  | cancel the current scope, open a fresh one                 | none                           |
//! | `Data`           | admit an execution and spawn it                            | `NonFatalError`*, then exactly one `Data` or `FatalError` |
//! | anything else    |                                                            | `FatalError` (invalid request) |
//!
//! ## Rules
//! - Replies go through one outbox drained by a single writer task, so frames never interleave.
//! - A `Data` request while an execution is in flight is answered `Busy` without starting work.
//! - A `Data` request right after a `CancelRequest` waits for the cancelled run to wind down
//!   and then starts fresh; the cancelled run still answers `FatalError("cancelled")` first.
//! - A malformed or oversized inbound frame is answered with `FatalError` and the
//!   session keeps reading. Only a transport failure ends the session.
//! - A reply that cannot be encoded (for example a result larger than the frame
//!   limit) is replaced by a `FatalError` describing why.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::error::{ExecError, ProtocolError};
use crate::events::{Bus, Event, EventKind};
use crate::exec::{Execution, JobRef, Supervisor};
use crate::protocol::{Body, DataPayload, Envelope, EnvelopeCodec};

const DEFAULT_OUTBOX: usize = 64;

/// Per-connection adapter between the wire protocol and a [`Supervisor`].
pub struct Session<S> {
    stream: S,
    peer: Arc<str>,
    supervisor: Supervisor,
    job: JobRef,
    bus: Bus,
    outbox_capacity: usize,
    codec: EnvelopeCodec,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Creates a session over `stream`.
    pub fn new(stream: S, supervisor: Supervisor, job: JobRef, bus: Bus) -> Self {
        let peer: Arc<str> = Arc::from(supervisor.name());
        Self {
            stream,
            peer,
            supervisor,
            job,
            bus,
            outbox_capacity: DEFAULT_OUTBOX,
            codec: EnvelopeCodec::default(),
        }
    }

    /// Sets the peer name used in events and logs.
    pub fn with_peer(mut self, peer: impl Into<Arc<str>>) -> Self {
        self.peer = peer.into();
        self
    }

    /// Sets the capacity of the outbound envelope queue (min 1).
    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity.max(1);
        self
    }

    /// Sets the codec (for example a smaller maximum frame length).
    pub fn with_codec(mut self, codec: EnvelopeCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Serves the connection until the peer closes it, the transport fails,
    /// or `shutdown` is cancelled.
    ///
    /// Any in-flight execution is cancelled before returning.
    ///
    /// # Errors
    /// The transport error that ended the session, if any.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ProtocolError> {
        let Session {
            stream,
            peer,
            supervisor,
            job,
            bus,
            outbox_capacity,
            codec,
        } = self;

        let (rd, wr) = tokio::io::split(stream);
        let mut reader = FramedRead::new(rd, codec.clone());
        let (outbox, rx) = mpsc::channel::<Envelope>(outbox_capacity);
        let writer = tokio::spawn(write_loop(FramedWrite::new(wr, codec), rx, Arc::clone(&peer)));

        bus.publish(Event::new(EventKind::SessionOpened).with_source(Arc::clone(&peer)));

        let mut scope = shutdown.child_token();
        let mut inflight: Option<(JoinHandle<()>, CancellationToken)> = None;

        let result = loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                next = reader.next() => next,
            };

            let envelope = match next {
                None => break Ok(()),
                Some(Err(err)) => {
                    violation(&bus, &peer, &err);
                    break Err(err);
                }
                Some(Ok(Err(err))) => {
                    violation(&bus, &peer, &err);
                    let _ = outbox.send(Envelope::fatal(err.as_message())).await;
                    continue;
                }
                Some(Ok(Ok(envelope))) => envelope,
            };

            let (kind, timestamp) = (envelope.kind(), envelope.timestamp());
            match envelope.into_body() {
                Body::StatusRequest(_) => {
                    let reply = match supervisor.status().to_payload() {
                        Ok(payload) => Envelope::new(timestamp, Body::Data(payload)),
                        Err(err) => Envelope::fatal(err.as_message()),
                    };
                    let _ = outbox.send(reply).await;
                }
                Body::CancelRequest => {
                    scope.cancel();
                    scope = shutdown.child_token();
                }
                Body::Data(payload) => {
                    if let Some((handle, token)) = inflight.take() {
                        if token.is_cancelled() || !supervisor.is_running() {
                            let _ = handle.await;
                        } else {
                            inflight = Some((handle, token));
                        }
                    }
                    match supervisor.try_start() {
                        Ok(exec) => {
                            let token = scope.clone();
                            let handle = tokio::spawn(execute(
                                exec,
                                Arc::clone(&job),
                                payload,
                                token.clone(),
                                outbox.clone(),
                            ));
                            inflight = Some((handle, token));
                        }
                        Err(err) => {
                            let _ = outbox.send(Envelope::fatal(err.as_message())).await;
                        }
                    }
                }
                Body::NonFatalError(_) | Body::FatalError(_) => {
                    let reason = format!("unknown/invalid request: unexpected {}", kind.as_str());
                    bus.publish(
                        Event::new(EventKind::ProtocolViolation)
                            .with_source(Arc::clone(&peer))
                            .with_reason(reason.clone()),
                    );
                    let _ = outbox.send(Envelope::fatal(reason)).await;
                }
            }
        };

        scope.cancel();
        if let Some((handle, _)) = inflight.take() {
            let _ = handle.await;
        }
        drop(outbox);
        let _ = writer.await;

        let mut closed = Event::new(EventKind::SessionClosed).with_source(peer);
        if let Err(err) = &result {
            closed = closed.with_reason(err.to_string());
        }
        bus.publish(closed);
        result
    }
}

/// Drives one admitted execution and streams its replies to the outbox.
async fn execute(
    exec: Execution,
    job: JobRef,
    input: DataPayload,
    scope: CancellationToken,
    outbox: mpsc::Sender<Envelope>,
) {
    let (warn_tx, mut warn_rx) = mpsc::unbounded_channel();
    let run = exec.run(&job, input, scope, warn_tx);
    tokio::pin!(run);

    let outcome: Result<DataPayload, ExecError> = loop {
        tokio::select! {
            biased;
            Some(warning) = warn_rx.recv() => {
                let _ = outbox.send(Envelope::non_fatal(warning.to_string())).await;
            }
            res = &mut run => break res,
        }
    };
    while let Ok(warning) = warn_rx.try_recv() {
        let _ = outbox.send(Envelope::non_fatal(warning.to_string())).await;
    }

    let reply = match outcome {
        Ok(payload) => Envelope::data(payload),
        Err(err) => Envelope::fatal(err.as_message()),
    };
    let _ = outbox.send(reply).await;
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, EnvelopeCodec>,
    mut rx: mpsc::Receiver<Envelope>,
    peer: Arc<str>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(envelope) = rx.recv().await {
        let err = match sink.send(envelope).await {
            Ok(()) => continue,
            Err(err) if err.breaks_framing() => {
                tracing::warn!(peer = %peer, error = %err, "failed to write envelope");
                return;
            }
            Err(err) => err,
        };
        // Encoding failed before any byte was buffered: the sink is still usable.
        tracing::warn!(peer = %peer, error = %err, "reply not encodable, sending fatal error instead");
        match sink.send(Envelope::fatal(err.as_message())).await {
            Ok(()) => {}
            Err(err) if err.breaks_framing() => return,
            Err(err) => tracing::warn!(peer = %peer, error = %err, "fatal reply not encodable"),
        }
    }
    let _ = sink.get_mut().shutdown().await;
}

fn violation(bus: &Bus, peer: &Arc<str>, err: &ProtocolError) {
    bus.publish(
        Event::new(EventKind::ProtocolViolation)
            .with_source(Arc::clone(peer))
            .with_reason(err.to_string()),
    );
}
