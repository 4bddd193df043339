//! # WorkerLink: one coordinator-to-worker connection.
//!
//! Writes are serialized behind an async mutex. A reader task decodes every
//! inbound envelope and routes it:
//! - status snapshots (`Data` with content type `raw/status`) → status queue;
//! - everything else, malformed frames included → response queue, consumed by
//!   dispatch rounds.
//!
//! `outstanding` counts `Data` requests whose terminal reply has not been
//! consumed yet. A round that finds `outstanding > 1` when its reply arrives
//! knows the reply belongs to an earlier, aborted round and skips it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::{DispatchError, ProtocolError};
use crate::protocol::{Envelope, EnvelopeCodec, now_nanos};

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One decoded reply, or the reason a frame could not be decoded.
pub(crate) type Response = Result<Envelope, ProtocolError>;

/// Connection bookkeeping for one worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkState {
    /// Worker name (address).
    pub worker: Arc<str>,
    /// False once the reader saw end of stream or a framing error.
    pub connected: bool,
    /// `Data` requests still awaiting a terminal reply.
    pub outstanding: usize,
}

/// One connection to a worker.
pub struct WorkerLink {
    name: Arc<str>,
    sink: Mutex<FramedWrite<BoxWriter, EnvelopeCodec>>,
    responses: Mutex<mpsc::UnboundedReceiver<Response>>,
    statuses: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    outstanding: AtomicUsize,
    status_tag: AtomicI64,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl WorkerLink {
    /// Wraps `stream` and spawns its reader task.
    pub fn new<S>(name: impl Into<Arc<str>>, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let name = name.into();
        let (rd, wr) = tokio::io::split(stream);
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(
            FramedRead::new(rd, EnvelopeCodec::default()),
            resp_tx,
            status_tx,
            Arc::clone(&connected),
            Arc::clone(&name),
        ));

        let writer: BoxWriter = Box::new(wr);
        Self {
            name,
            sink: Mutex::new(FramedWrite::new(writer, EnvelopeCodec::default())),
            responses: Mutex::new(resp_rx),
            statuses: Mutex::new(status_rx),
            outstanding: AtomicUsize::new(0),
            status_tag: AtomicI64::new(0),
            connected,
            reader,
        }
    }

    /// Worker name (address).
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// True until the worker closes the connection.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Snapshot of the link's bookkeeping.
    pub fn state(&self) -> LinkState {
        LinkState {
            worker: Arc::clone(&self.name),
            connected: self.is_connected(),
            outstanding: self.outstanding.load(Ordering::Acquire),
        }
    }

    /// Writes one envelope.
    pub async fn send(&self, envelope: Envelope) -> Result<(), DispatchError> {
        self.sink
            .lock()
            .await
            .send(envelope)
            .await
            .map_err(|source| DispatchError::Send {
                worker: self.name.to_string(),
                source,
            })
    }

    /// Writes a `Data` request and counts it as outstanding.
    pub(crate) async fn send_request(&self, envelope: Envelope) -> Result<(), DispatchError> {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let sent = self.send(envelope).await;
        if sent.is_err() {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
        }
        sent
    }

    /// Marks one terminal reply consumed; true if it answered an earlier request.
    pub(crate) fn settle(&self) -> bool {
        let before = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        before > 1
    }

    /// Timestamp for the next status request, strictly increasing per link.
    pub(crate) fn next_status_tag(&self) -> i64 {
        let now = now_nanos();
        let prev = self
            .status_tag
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(prev.saturating_add(1))
    }

    pub(crate) async fn responses(&self) -> MutexGuard<'_, mpsc::UnboundedReceiver<Response>> {
        self.responses.lock().await
    }

    pub(crate) async fn statuses(&self) -> MutexGuard<'_, mpsc::UnboundedReceiver<Envelope>> {
        self.statuses.lock().await
    }
}

impl Drop for WorkerLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(
    mut reader: FramedRead<R, EnvelopeCodec>,
    responses: mpsc::UnboundedSender<Response>,
    statuses: mpsc::UnboundedSender<Envelope>,
    connected: Arc<AtomicBool>,
    name: Arc<str>,
) where
    R: AsyncRead + Unpin,
{
    while let Some(item) = reader.next().await {
        match item {
            Ok(Ok(envelope)) if envelope.is_status_reply() => {
                let _ = statuses.send(envelope);
            }
            Ok(Ok(envelope)) => {
                let _ = responses.send(Ok(envelope));
            }
            Ok(Err(err)) => {
                tracing::warn!(worker = %name, error = %err, "malformed envelope from worker");
                let _ = responses.send(Err(err));
            }
            Err(err) => {
                tracing::warn!(worker = %name, error = %err, "worker stream failed");
                break;
            }
        }
    }
    connected.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DataPayload, Kind};
    use crate::exec::{ExecState, SupervisorStatus};
    use std::time::Duration;

    #[tokio::test]
    async fn test_reader_routes_status_replies() {
        let (client, server) = tokio::io::duplex(4096);
        let link = WorkerLink::new("w1", client);
        let mut worker = tokio_util::codec::Framed::new(server, EnvelopeCodec::default());

        let status = SupervisorStatus {
            critical_limit: Duration::from_secs(2),
            non_critical_limit: Duration::from_secs(1),
            elapsed: Duration::ZERO,
            state: ExecState::Idle,
        };
        worker.send(Envelope::data(status.to_payload().unwrap())).await.unwrap();
        worker.send(Envelope::data(DataPayload::int64(7))).await.unwrap();

        let st = link.statuses().await.recv().await.unwrap();
        assert!(st.is_status_reply());
        let resp = link.responses().await.recv().await.unwrap().unwrap();
        assert_eq!(resp.kind(), Kind::Data);
        assert!(!resp.is_status_reply());

        drop(worker);
        assert!(link.responses().await.recv().await.is_none());
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_status_tags_increase() {
        let (client, _server) = tokio::io::duplex(64);
        let link = WorkerLink::new("w1", client);
        let a = link.next_status_tag();
        let b = link.next_status_tag();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_outstanding_bookkeeping() {
        let (client, _server) = tokio::io::duplex(4096);
        let link = WorkerLink::new("w1", client);
        link.send_request(Envelope::data(DataPayload::int64(1))).await.unwrap();
        link.send_request(Envelope::data(DataPayload::int64(2))).await.unwrap();
        assert_eq!(link.state().outstanding, 2);
        assert!(link.settle());
        assert!(!link.settle());
        assert_eq!(link.state().outstanding, 0);
    }
}
