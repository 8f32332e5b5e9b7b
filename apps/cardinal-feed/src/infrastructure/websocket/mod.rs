//! WebSocket Transport
//!
//! `tokio-tungstenite` implementations of the dial and connection ports.
//! The socket is split so reads and writes go through separate halves.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{ConnectionError, InboundFrame, StreamConnection, StreamDialer};

/// Default limit for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Dialer
// =============================================================================

/// Dials `ws://` and `wss://` endpoints.
#[derive(Debug, Clone, Copy)]
pub struct TungsteniteDialer {
    connect_timeout: Duration,
}

impl Default for TungsteniteDialer {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl TungsteniteDialer {
    /// Create a dialer that gives up after `connect_timeout`.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl StreamDialer for TungsteniteDialer {
    async fn dial(&self, url: &str) -> Result<Box<dyn StreamConnection>, ConnectionError> {
        let (socket, response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| ConnectionError::DialTimeout(self.connect_timeout))?
                .map_err(|e| ConnectionError::Dial(e.to_string()))?;

        tracing::debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(TungsteniteConnection::new(socket)))
    }
}

// =============================================================================
// Connection
// =============================================================================

/// An established WebSocket connection.
pub struct TungsteniteConnection<S = MaybeTlsStream<TcpStream>> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> TungsteniteConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established socket.
    #[must_use]
    pub fn new(socket: WebSocketStream<S>) -> Self {
        let (sink, stream) = socket.split();
        Self { sink, stream }
    }
}

impl<S> std::fmt::Debug for TungsteniteConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TungsteniteConnection").finish_non_exhaustive()
    }
}

fn to_frame(message: Message) -> Option<InboundFrame> {
    match message {
        Message::Text(text) => Some(InboundFrame::Text(text.as_str().to_owned())),
        Message::Binary(data) => Some(InboundFrame::Binary(data.to_vec())),
        Message::Ping(data) => Some(InboundFrame::Ping(data.to_vec())),
        Message::Pong(data) => Some(InboundFrame::Pong(data.to_vec())),
        Message::Close(frame) => Some(InboundFrame::Close(
            frame.map(|frame| frame.reason.as_str().to_owned()),
        )),
        Message::Frame(_) => None,
    }
}

#[async_trait]
impl<S> StreamConnection for TungsteniteConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, ConnectionError>> {
        loop {
            match self.stream.next().await? {
                Ok(message) => {
                    if let Some(frame) = to_frame(message) {
                        return Some(Ok(frame));
                    }
                }
                Err(e) => return Some(Err(ConnectionError::Read(e.to_string()))),
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ConnectionError::Write(e.to_string()))
    }

    async fn send_pong(&mut self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        self.sink
            .send(Message::Pong(payload.into()))
            .await
            .map_err(|e| ConnectionError::Write(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(ConnectionError::Write(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    use super::*;

    #[test]
    fn text_and_binary_map_to_data_frames() {
        assert_eq!(
            to_frame(Message::Text("{}".into())),
            Some(InboundFrame::Text("{}".to_string()))
        );
        assert_eq!(
            to_frame(Message::Binary(vec![1, 2].into())),
            Some(InboundFrame::Binary(vec![1, 2]))
        );
    }

    #[test]
    fn probes_keep_payload() {
        assert_eq!(
            to_frame(Message::Ping(b"hb".to_vec().into())),
            Some(InboundFrame::Ping(b"hb".to_vec()))
        );
    }

    #[test]
    fn close_carries_reason() {
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "maintenance".into(),
        }));
        assert_eq!(
            to_frame(close),
            Some(InboundFrame::Close(Some("maintenance".to_string())))
        );
        assert_eq!(to_frame(Message::Close(None)), Some(InboundFrame::Close(None)));
    }

    #[tokio::test]
    async fn dial_refused_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dialer = TungsteniteDialer::new(Duration::from_secs(2));
        let result = dialer.dial(&format!("ws://{addr}/stream")).await;
        assert!(matches!(result, Err(ConnectionError::Dial(_))));
    }
}
