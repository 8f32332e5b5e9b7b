//! Port Interfaces
//!
//! Contracts between the session core and the exchange-specific adapters.
//! A stream session only ever talks to these traits, so any exchange that
//! can provide a dialer, a frame protocol and (optionally) a listen key
//! source can be driven by the same state machine.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`ListenKeySource`]: REST surface that issues and renews listen keys
//! - [`StreamDialer`] / [`StreamConnection`]: the physical streaming transport
//! - [`StreamProtocol`]: exchange frame decoding and subscription messages

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::market::DecodedFrame;

// =============================================================================
// Errors
// =============================================================================

/// Listen key acquisition or renewal failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No credentials are configured for authenticated endpoints.
    #[error("no credentials configured for authenticated endpoints")]
    MissingCredentials,

    /// The request never reached the exchange or the response was lost.
    #[error("listen key request failed: {0}")]
    Transport(String),

    /// The exchange rejected the request.
    #[error("listen key request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Exchange error message.
        message: String,
    },

    /// The exchange answered with something that is not a listen key.
    #[error("invalid listen key response: {0}")]
    InvalidResponse(String),
}

/// Transport-level failure on a streaming connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// Dialing the stream endpoint failed.
    #[error("dial failed: {0}")]
    Dial(String),

    /// Dialing did not complete in time.
    #[error("dial timed out after {0:?}")]
    DialTimeout(std::time::Duration),

    /// Reading from the connection failed.
    #[error("read failed: {0}")]
    Read(String),

    /// Writing to the connection failed.
    #[error("write failed: {0}")]
    Write(String),
}

/// A single frame could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame is not valid JSON (or the expected binary encoding).
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame is well formed but its event type is unknown.
    #[error("unknown event type: {0}")]
    UnknownEvent(String),

    /// A field is missing or has the wrong shape.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

// =============================================================================
// Frames
// =============================================================================

/// One frame received from a streaming connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Text data frame.
    Text(String),
    /// Binary data frame.
    Binary(Vec<u8>),
    /// Liveness probe from the peer.
    Ping(Vec<u8>),
    /// Reply to a probe we sent.
    Pong(Vec<u8>),
    /// The peer is closing the connection.
    Close(Option<String>),
}

// =============================================================================
// Ports
// =============================================================================

/// Issues and renews listen keys for authenticated streams.
#[async_trait]
pub trait ListenKeySource: Send + Sync {
    /// Request a new listen key.
    async fn create_listen_key(&self) -> Result<String, AuthError>;

    /// Extend the validity of an existing listen key.
    async fn keep_alive_listen_key(&self, key: &str) -> Result<(), AuthError>;

    /// Invalidate a listen key on the exchange. Defaults to a no-op.
    async fn close_listen_key(&self, _key: &str) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Opens streaming connections.
#[async_trait]
pub trait StreamDialer: Send + Sync {
    /// Dial `url` and return the established connection.
    async fn dial(&self, url: &str) -> Result<Box<dyn StreamConnection>, ConnectionError>;
}

/// An established streaming connection.
#[async_trait]
pub trait StreamConnection: Send {
    /// Receive the next frame; `None` when the stream has ended.
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, ConnectionError>>;

    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError>;

    /// Answer a liveness probe.
    async fn send_pong(&mut self, payload: Vec<u8>) -> Result<(), ConnectionError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Exchange-specific framing: turns raw frames into typed payloads.
pub trait StreamProtocol: Send + Sync {
    /// Decode one raw frame.
    ///
    /// Returns `Ok(None)` for control frames (acknowledgements, heartbeats)
    /// that carry no payload for the bus.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` when the frame is malformed or unknown.
    fn decode(&self, raw: &[u8]) -> Result<Option<DecodedFrame>, DecodeError>;

    /// Messages to send right after the connection is established.
    ///
    /// `authenticated` is true when the URL was rewritten to carry a listen
    /// key, which on some exchanges replaces the URL's stream list.
    fn subscribe_messages(&self, _authenticated: bool) -> Vec<String> {
        Vec::new()
    }
}
