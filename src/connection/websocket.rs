//! WebSocket transport to the relay

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::tungstenite::Error as WsError;

use super::{Frame, FrameSink, FrameStream, Transport};
use crate::error::ConnError;

/// Plain `ws://` client transport. TLS is terminated in front of the relay,
/// so `wss://` endpoints are refused before any connection attempt.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &str) -> Result<(FrameSink, FrameStream), ConnError> {
        if !endpoint.starts_with("ws://") {
            return Err(ConnError::InvalidEndpoint(endpoint.to_string()));
        }

        let (ws, response) = connect_async(endpoint)
            .await
            .map_err(|e| ConnError::Transport(e.to_string()))?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws.split();
        let sink = write
            .sink_map_err(|e| ConnError::Transport(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, ConnError>(to_message(frame))));
        let stream = read.filter_map(|msg| future::ready(from_message(msg)));

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Binary(data) => Message::Binary(data.to_vec()),
        Frame::Text(text) => Message::Text(text),
        Frame::Close(reason) => Message::Close(reason.map(|reason| CloseFrame {
            code: CloseCode::Normal,
            reason: reason.into(),
        })),
    }
}

/// Control frames are handled by tungstenite and never surface
fn from_message(msg: Result<Message, WsError>) -> Option<Result<Frame, ConnError>> {
    match msg {
        Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(Bytes::from(data)))),
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
        Ok(Message::Close(close)) => Some(Ok(Frame::Close(
            close.map(|frame| frame.reason.into_owned()),
        ))),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
        Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => None,
        Err(e) => Some(Err(ConnError::Transport(e.to_string()))),
    }
}
