//! Bus Events
//!
//! The two event envelopes carried by the event bus. Both are immutable once
//! constructed: a session builds them, the consumer reads them.

use super::market::{TickerPayload, WatcherPayload};

/// One decoded trade or price update from an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerEvent {
    exchange_name: String,
    payload: TickerPayload,
}

impl TickerEvent {
    /// Create a new ticker event.
    #[must_use]
    pub fn new(exchange_name: impl Into<String>, payload: TickerPayload) -> Self {
        Self {
            exchange_name: exchange_name.into(),
            payload,
        }
    }

    /// Name of the exchange that produced the event.
    #[must_use]
    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    /// The decoded payload.
    #[must_use]
    pub const fn payload(&self) -> &TickerPayload {
        &self.payload
    }

    /// Consume the event and return its payload.
    #[must_use]
    pub fn into_payload(self) -> TickerPayload {
        self.payload
    }
}

/// One decoded non-trade update (order book, account, orders).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherEvent {
    exchange_name: String,
    payload: WatcherPayload,
}

impl WatcherEvent {
    /// Create a new watcher event.
    #[must_use]
    pub fn new(exchange_name: impl Into<String>, payload: WatcherPayload) -> Self {
        Self {
            exchange_name: exchange_name.into(),
            payload,
        }
    }

    /// Name of the exchange that produced the event.
    #[must_use]
    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    /// The decoded payload.
    #[must_use]
    pub const fn payload(&self) -> &WatcherPayload {
        &self.payload
    }

    /// Consume the event and return its payload.
    #[must_use]
    pub fn into_payload(self) -> WatcherPayload {
        self.payload
    }
}
