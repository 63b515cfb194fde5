//! Persistent relay connection shared by the audio and telemetry sessions
//!
//! ```text
//!            open()                transport up
//! Disconnected ───────► Connecting ─────────────► Connected
//!      ▲                    │                         │
//!      └────────────────────┴─── close / error / remote close
//! ```
//!
//! Reconnection is never automatic. Every transition back to
//! `Disconnected` reaches the observer exactly once: `on_close` for local
//! or remote closes, `on_error` for failures.

pub mod memory;
#[cfg(feature = "websocket")]
pub mod websocket;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ConnError, SendError};

pub use memory::{MemoryPeer, MemoryRelay, MemoryTransport};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

/// Lifecycle state of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// One message on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Bytes),
    Text(String),
    Close(Option<String>),
}

/// Why a connection went back to `Disconnected`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called on this side
    Local,
    /// The relay closed, with its reason if it gave one
    Remote(Option<String>),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Local => write!(f, "closed locally"),
            CloseReason::Remote(Some(reason)) => write!(f, "closed by relay: {}", reason),
            CloseReason::Remote(None) => write!(f, "closed by relay"),
        }
    }
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = ConnError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ConnError>> + Send>>;

/// Something that can establish a framed bidirectional link
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<(FrameSink, FrameStream), ConnError>;
}

/// Callbacks for connection lifecycle and inbound messages
#[allow(unused_variables)]
pub trait ConnectionObserver: Send + Sync {
    fn on_open(&self) {}
    fn on_binary_message(&self, data: Bytes) {}
    fn on_text_message(&self, text: String) {}
    fn on_close(&self, reason: CloseReason) {}
    fn on_error(&self, cause: ConnError) {}
}

struct ConnInner {
    state: SessionState,
    /// Bumped on every open and close so stale tasks can tell they are stale
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    reader: Option<JoinHandle<()>>,
}

struct Shared {
    name: &'static str,
    inner: Mutex<ConnInner>,
    /// Serializes transitions and observer callbacks
    dispatch: Mutex<()>,
    observer: Arc<dyn ConnectionObserver>,
}

/// A single relay connection
#[derive(Clone)]
pub struct SessionConnection {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
}

impl SessionConnection {
    pub fn new(
        name: &'static str,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        Self {
            transport,
            shared: Arc::new(Shared {
                name,
                inner: Mutex::new(ConnInner {
                    state: SessionState::Disconnected,
                    generation: 0,
                    outbound: None,
                    reader: None,
                }),
                dispatch: Mutex::new(()),
                observer,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Open the connection.
    ///
    /// Rejected with [`ConnError::AlreadyOpen`] unless currently
    /// `Disconnected`. Resolves once the transport is up (or failed).
    pub async fn open(&self, endpoint: &str) -> Result<(), ConnError> {
        let generation = {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Disconnected {
                return Err(ConnError::AlreadyOpen);
            }
            inner.state = SessionState::Connecting;
            inner.generation += 1;
            inner.generation
        };

        tracing::info!("[{}] Connecting to {}", self.shared.name, endpoint);

        let (sink, stream) = match self.transport.connect(endpoint).await {
            Ok(link) => link,
            Err(e) => {
                let _dispatch = self.shared.dispatch.lock();
                if self.shared.transition_to_disconnected(generation) {
                    tracing::warn!("[{}] Connection failed: {}", self.shared.name, e);
                    self.shared.observer.on_error(e.clone());
                }
                return Err(e);
            }
        };

        let _dispatch = self.shared.dispatch.lock();
        {
            let mut inner = self.shared.inner.lock();
            if inner.generation != generation || inner.state != SessionState::Connecting {
                tracing::debug!("[{}] Closed while connecting, dropping link", self.shared.name);
                return Err(ConnError::Transport("closed while connecting".to_string()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            inner.state = SessionState::Connected;
            inner.outbound = Some(tx);
            tokio::spawn(write_loop(Arc::clone(&self.shared), generation, sink, rx));
            inner.reader = Some(tokio::spawn(read_loop(
                Arc::clone(&self.shared),
                generation,
                stream,
            )));
        }

        tracing::info!("[{}] Connected", self.shared.name);
        self.shared.observer.on_open();
        Ok(())
    }

    /// Queue a frame for the relay. Never buffers while not connected.
    pub fn send(&self, frame: Frame) -> Result<(), SendError> {
        let inner = self.shared.inner.lock();
        match (inner.state, inner.outbound.as_ref()) {
            (SessionState::Connected, Some(tx)) => {
                tx.send(frame).map_err(|_| SendError::NotConnected)
            }
            _ => Err(SendError::NotConnected),
        }
    }

    pub fn send_binary(&self, data: Bytes) -> Result<(), SendError> {
        self.send(Frame::Binary(data))
    }

    pub fn send_text(&self, text: String) -> Result<(), SendError> {
        self.send(Frame::Text(text))
    }

    /// Close the connection. A no-op when already disconnected.
    pub fn close(&self) {
        let _dispatch = self.shared.dispatch.lock();
        let previous = {
            let mut inner = self.shared.inner.lock();
            if inner.state == SessionState::Disconnected {
                return;
            }
            let previous = inner.state;
            inner.state = SessionState::Disconnected;
            inner.generation += 1;
            // Dropping the sender lets the writer flush and close the sink
            inner.outbound = None;
            if let Some(reader) = inner.reader.take() {
                reader.abort();
            }
            previous
        };

        tracing::info!("[{}] Closed ({:?} -> Disconnected)", self.shared.name, previous);
        self.shared.observer.on_close(CloseReason::Local);
    }
}

impl Shared {
    /// Move to `Disconnected` if `generation` is still current.
    /// Callers must hold `dispatch`.
    fn transition_to_disconnected(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state == SessionState::Disconnected {
            return false;
        }
        inner.state = SessionState::Disconnected;
        inner.outbound = None;
        if let Some(reader) = inner.reader.take() {
            reader.abort();
        }
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        let inner = self.inner.lock();
        inner.generation == generation && inner.state == SessionState::Connected
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    generation: u64,
    mut sink: FrameSink,
    mut rx: mpsc::UnboundedReceiver<Frame>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(frame).await {
            let _dispatch = shared.dispatch.lock();
            if shared.transition_to_disconnected(generation) {
                tracing::warn!("[{}] Write failed: {}", shared.name, e);
                shared.observer.on_error(e);
            } else {
                tracing::debug!("[{}] Write failed after close: {}", shared.name, e);
            }
            return;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(shared: Arc<Shared>, generation: u64, mut stream: FrameStream) {
    let ended = loop {
        let next = stream.next().await;

        let _dispatch = shared.dispatch.lock();
        if !shared.is_current(generation) {
            return;
        }

        match next {
            Some(Ok(Frame::Binary(data))) => shared.observer.on_binary_message(data),
            Some(Ok(Frame::Text(text))) => shared.observer.on_text_message(text),
            Some(Ok(Frame::Close(reason))) => break Ok(CloseReason::Remote(reason)),
            Some(Err(e)) => break Err(e),
            None => break Ok(CloseReason::Remote(None)),
        }
    };

    let _dispatch = shared.dispatch.lock();
    if !shared.transition_to_disconnected(generation) {
        return;
    }

    match ended {
        Ok(reason) => {
            tracing::info!("[{}] Connection {}", shared.name, reason);
            shared.observer.on_close(reason);
        }
        Err(e) => {
            tracing::warn!("[{}] Connection error: {}", shared.name, e);
            shared.observer.on_error(e);
        }
    }
}
