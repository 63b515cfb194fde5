//! In-process transport
//!
//! Each `connect` hands a [`MemoryPeer`] to the [`MemoryRelay`], which plays
//! the role of the relay server: it sees every frame the client sends and can
//! push frames, errors or a hang-up back.

use async_trait::async_trait;
use futures_util::{sink, stream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Frame, FrameSink, FrameStream, Transport};
use crate::error::ConnError;

/// Transport whose far end is a [`MemoryRelay`]
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicBool,
    connects: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> (Arc<Self>, MemoryRelay) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            peers: tx,
            refuse: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        });
        (transport, MemoryRelay { peers: rx })
    }

    /// Make subsequent connects fail
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of successful connects so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, endpoint: &str) -> Result<(FrameSink, FrameStream), ConnError> {
        if endpoint.is_empty() {
            return Err(ConnError::InvalidEndpoint(endpoint.to_string()));
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConnError::Transport("connection refused".to_string()));
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();

        self.peers
            .send(MemoryPeer {
                endpoint: endpoint.to_string(),
                sent: sent_rx,
                inject: inject_tx,
            })
            .map_err(|_| ConnError::Transport("relay is gone".to_string()))?;
        self.connects.fetch_add(1, Ordering::SeqCst);

        let sink = sink::unfold(sent_tx, |tx: mpsc::UnboundedSender<Frame>, frame: Frame| async move {
            tx.send(frame)
                .map_err(|_| ConnError::Transport("relay hung up".to_string()))?;
            Ok::<_, ConnError>(tx)
        });
        let stream = stream::unfold(inject_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Relay side of a [`MemoryTransport`]
pub struct MemoryRelay {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryRelay {
    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }
}

/// Relay's view of one client connection
pub struct MemoryPeer {
    endpoint: String,
    sent: mpsc::UnboundedReceiver<Frame>,
    inject: mpsc::UnboundedSender<Result<Frame, ConnError>>,
}

impl MemoryPeer {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Next frame the client sent; `None` once the client closed
    pub async fn next_sent(&mut self) -> Option<Frame> {
        self.sent.recv().await
    }

    /// A frame the client already sent, without waiting
    pub fn try_sent(&mut self) -> Option<Frame> {
        self.sent.try_recv().ok()
    }

    /// Deliver a frame to the client
    pub fn push(&self, frame: Frame) {
        let _ = self.inject.send(Ok(frame));
    }

    /// Break the client's stream with an error
    pub fn fail(&self, error: ConnError) {
        let _ = self.inject.send(Err(error));
    }

    /// Stop taking frames from the client; its next write fails
    pub fn break_writes(&mut self) {
        self.sent.close();
    }

    /// Drop the connection without a close frame
    pub fn hang_up(self) {}
}
