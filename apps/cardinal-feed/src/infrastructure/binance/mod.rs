//! Binance Adapter
//!
//! - `messages`: wire types for market and user data streams
//! - `protocol`: frame decoder and post-connect subscription
//! - `rest`: listen key lifecycle over the REST API
//!
//! Market streams are combined into one connection:
//! `wss://stream.binance.com:9443/stream?streams=<sym>@trade/<sym>@bookTicker/<sym>@depth@100ms`.
//! For the authenticated stream the stream list is replaced by the listen
//! key and the market streams are subscribed after connecting.

pub mod messages;
pub mod protocol;
pub mod rest;

pub use protocol::BinanceProtocol;
pub use rest::BinanceListenKeyClient;

use crate::application::services::session::{DEFAULT_STREAM_DELIMITER, rewrite_stream_url};

/// Exchange name stamped on Binance events.
pub const BINANCE_EXCHANGE: &str = "binance";

/// Combined-stream layout for a set of symbols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinanceStreamConfig {
    ws_url: String,
    delimiter: String,
    symbols: Vec<String>,
}

impl BinanceStreamConfig {
    /// Streams for `symbols` (lower-cased) on `ws_url`.
    #[must_use]
    pub fn new(ws_url: impl Into<String>, symbols: Vec<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            delimiter: DEFAULT_STREAM_DELIMITER.to_string(),
            symbols: symbols.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// Use `delimiter` in place of the default `?streams=` marker.
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Stream names, three per symbol.
    #[must_use]
    pub fn streams(&self) -> Vec<String> {
        self.symbols
            .iter()
            .flat_map(|symbol| {
                [
                    format!("{symbol}@trade"),
                    format!("{symbol}@bookTicker"),
                    format!("{symbol}@depth@100ms"),
                ]
            })
            .collect()
    }

    /// Combined-stream URL carrying every stream.
    #[must_use]
    pub fn url(&self) -> String {
        rewrite_stream_url(&self.ws_url, &self.delimiter, &self.streams().join("/"))
    }

    /// Decoder that re-subscribes these streams on authenticated connects.
    #[must_use]
    pub fn protocol(&self) -> BinanceProtocol {
        BinanceProtocol::new(self.streams())
    }
}
