use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::events::{EventKind, EventTable};
use super::protocol;
use super::transport::{FrameSink, FrameStream, Transport};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Reply {
    pub result: Value,
    /// Bytes of the response frame.
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkStatus {
    Open,
    /// The peer went away without us asking.
    Lost,
    Closed,
}

enum Outbound {
    Frame(String),
    Close,
}

struct LinkState {
    status: LinkStatus,
    pending: HashMap<u64, oneshot::Sender<Result<Reply>>>,
}

struct Shared {
    state: Mutex<LinkState>,
}

impl Shared {
    fn resolve(&self, id: u64, reply: Result<Reply>) {
        let tx = self.state.lock().pending.remove(&id);
        match tx {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => tracing::debug!(id, "response for unknown request"),
        }
    }

    fn shut(&self, status: LinkStatus) {
        let pending: Vec<oneshot::Sender<Result<Reply>>> = {
            let mut state = self.state.lock();
            if state.status == LinkStatus::Open {
                state.status = status;
                if status == LinkStatus::Lost {
                    tracing::warn!("connection lost");
                }
            }
            state.pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in pending {
            let _ = tx.send(Err(Error::ConnectionLost));
        }
    }
}

/// One live connection: a writer task draining an ordered queue and a reader task correlating
/// replies by id and routing pushed changes to the event table.
pub(crate) struct Link {
    out: mpsc::UnboundedSender<Outbound>,
    shared: Arc<Shared>,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Link {
    pub fn open(transport: Transport, events: Arc<EventTable>, traffic: bool) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(LinkState {
                status: LinkStatus::Open,
                pending: HashMap::new(),
            }),
        });
        let (out, rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(
            write_loop(transport.sink, rx, shared.clone(), traffic).in_current_span(),
        );
        let reader = tokio::spawn(
            read_loop(transport.stream, shared.clone(), events, traffic).in_current_span(),
        );

        Self {
            out,
            shared,
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
        }
    }

    /// Queues a request frame. Frames leave in the order this is called.
    pub fn request(&self, id: u64, text: String) -> Result<oneshot::Receiver<Result<Reply>>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.shared.state.lock();
            if state.status != LinkStatus::Open {
                return Err(Error::ConnectionLost);
            }
            state.pending.insert(id, tx);
        }

        if self.out.send(Outbound::Frame(text)).is_err() {
            self.shared.state.lock().pending.remove(&id);
            return Err(Error::ConnectionLost);
        }
        Ok(rx)
    }

    /// Drops the waiter for `id` once its caller stopped listening (timeout, cancellation).
    pub fn forget(&self, id: u64) {
        self.shared.state.lock().pending.remove(&id);
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Queues a frame that expects no reply.
    pub fn notify(&self, text: String) -> Result<()> {
        if self.status() != LinkStatus::Open {
            return Err(Error::ConnectionLost);
        }
        self.out
            .send(Outbound::Frame(text))
            .map_err(|_| Error::ConnectionLost)
    }

    pub fn status(&self) -> LinkStatus {
        self.shared.state.lock().status
    }

    /// Flushes queued frames, closes the socket and stops reading. Outstanding requests fail.
    pub async fn close(&self, grace: Duration) {
        self.shared.shut(LinkStatus::Closed);
        let _ = self.out.send(Outbound::Close);

        let writer = self.writer.lock().take();
        if let Some(mut writer) = writer
            && tokio::time::timeout(grace, &mut writer).await.is_err()
        {
            writer.abort();
        }

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.abort();
        }
    }

    /// Drops a dead link without a close handshake.
    pub fn abort(&self) {
        self.shared.shut(LinkStatus::Closed);
        let writer = self.writer.lock().take();
        let reader = self.reader.lock().take();
        for task in [writer, reader].into_iter().flatten() {
            task.abort();
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn write_loop(
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Shared>,
    traffic: bool,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            Outbound::Frame(text) => {
                if traffic {
                    tracing::trace!(target: "swarmr::traffic", direction = "sent", frame = %text);
                }
                if sink.send(text).await.is_err() {
                    shared.shut(LinkStatus::Lost);
                    return;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: Box<dyn FrameStream>,
    shared: Arc<Shared>,
    events: Arc<EventTable>,
    traffic: bool,
) {
    while let Some(frame) = stream.next_frame().await {
        let Ok(text) = frame else {
            break;
        };
        if traffic {
            tracing::trace!(target: "swarmr::traffic", direction = "received", frame = %text);
        }

        let size = text.len() as u64;
        let frame = match protocol::decode(&text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring undecodable frame");
                continue;
            }
        };

        for handle in &frame.change {
            events.dispatch(*handle, EventKind::Change);
        }
        for handle in &frame.close {
            events.dispatch(*handle, EventKind::Close);
        }

        match (frame.id, frame.error) {
            (Some(id), Some(err)) => shared.resolve(id, Err(err.into())),
            (Some(id), None) => shared.resolve(
                id,
                Ok(Reply {
                    result: frame.result.unwrap_or(Value::Null),
                    size,
                }),
            ),
            (None, Some(err)) => {
                tracing::warn!(code = err.code, message = %err.message, "engine reported an error");
            }
            (None, None) => {}
        }
    }
    shared.shut(LinkStatus::Lost);
}
