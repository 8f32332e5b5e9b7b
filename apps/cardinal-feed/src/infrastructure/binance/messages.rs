//! Binance Stream Message Types
//!
//! Wire format types for Binance spot WebSocket streams. Field names follow
//! the exchange's single-letter keys; unknown fields are ignored.
//!
//! # References
//!
//! - [WebSocket Streams](https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams)
//! - [User Data Streams](https://developers.binance.com/docs/binance-spot-api-docs/user-data-stream)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Envelopes
// =============================================================================

/// Combined-stream wrapper: `{"stream": "...", "data": {...}}`.
#[derive(Debug, Deserialize)]
pub struct CombinedEnvelope {
    /// Stream name (`btcusdt@trade`, or the listen key for user data).
    pub stream: String,
    /// Event payload.
    pub data: serde_json::Value,
}

/// Reply to a `SUBSCRIBE` / `UNSUBSCRIBE` request.
#[derive(Debug, Deserialize)]
pub struct ControlReply {
    /// Request id echoed back.
    pub id: serde_json::Value,
    /// Error details, if the request failed.
    #[serde(default)]
    pub error: Option<ControlError>,
}

/// Error carried by a control reply.
#[derive(Debug, Deserialize)]
pub struct ControlError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub msg: String,
}

/// Live subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest {
    /// Always `SUBSCRIBE`.
    pub method: &'static str,
    /// Stream names.
    pub params: Vec<String>,
    /// Request id.
    pub id: u64,
}

impl SubscribeRequest {
    /// Subscribe to `streams`.
    #[must_use]
    pub const fn new(streams: Vec<String>, id: u64) -> Self {
        Self {
            method: "SUBSCRIBE",
            params: streams,
            id,
        }
    }
}

// =============================================================================
// Market Streams
// =============================================================================

/// `<symbol>@trade`
#[derive(Debug, Deserialize)]
pub struct TradeMessage {
    /// Event time (ms).
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Trade id.
    #[serde(rename = "t")]
    pub trade_id: u64,
    /// Price.
    #[serde(rename = "p")]
    pub price: Decimal,
    /// Quantity.
    #[serde(rename = "q")]
    pub quantity: Decimal,
    /// Trade time (ms).
    #[serde(rename = "T")]
    pub trade_time: i64,
    /// Whether the buyer was the maker.
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

/// `<symbol>@ticker`
#[derive(Debug, Deserialize)]
pub struct DailyTickerMessage {
    /// Event time (ms).
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Last price.
    #[serde(rename = "c")]
    pub last_price: Decimal,
    /// Best bid price.
    #[serde(rename = "b")]
    pub bid_price: Decimal,
    /// Best bid quantity.
    #[serde(rename = "B")]
    pub bid_quantity: Decimal,
    /// Best ask price.
    #[serde(rename = "a")]
    pub ask_price: Decimal,
    /// Best ask quantity.
    #[serde(rename = "A")]
    pub ask_quantity: Decimal,
}

/// `<symbol>@bookTicker` (no event type field).
#[derive(Debug, Deserialize)]
pub struct BookTickerMessage {
    /// Order book update id.
    #[serde(rename = "u")]
    pub update_id: u64,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Best bid price.
    #[serde(rename = "b")]
    pub bid_price: Decimal,
    /// Best bid quantity.
    #[serde(rename = "B")]
    pub bid_quantity: Decimal,
    /// Best ask price.
    #[serde(rename = "a")]
    pub ask_price: Decimal,
    /// Best ask quantity.
    #[serde(rename = "A")]
    pub ask_quantity: Decimal,
}

/// `<symbol>@depth` / `<symbol>@depth@100ms`
#[derive(Debug, Deserialize)]
pub struct DepthUpdateMessage {
    /// Event time (ms).
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// First update id in event.
    #[serde(rename = "U")]
    pub first_update_id: u64,
    /// Final update id in event.
    #[serde(rename = "u")]
    pub final_update_id: u64,
    /// Bid levels as `[price, quantity]`.
    #[serde(rename = "b")]
    pub bids: Vec<(Decimal, Decimal)>,
    /// Ask levels as `[price, quantity]`.
    #[serde(rename = "a")]
    pub asks: Vec<(Decimal, Decimal)>,
}

// =============================================================================
// User Data Stream
// =============================================================================

/// `outboundAccountPosition`
#[derive(Debug, Deserialize)]
pub struct AccountPositionMessage {
    /// Event time (ms).
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Changed balances.
    #[serde(rename = "B")]
    pub balances: Vec<BalanceMessage>,
}

/// One balance inside `outboundAccountPosition`.
#[derive(Debug, Deserialize)]
pub struct BalanceMessage {
    /// Asset.
    #[serde(rename = "a")]
    pub asset: String,
    /// Free amount.
    #[serde(rename = "f")]
    pub free: Decimal,
    /// Locked amount.
    #[serde(rename = "l")]
    pub locked: Decimal,
}

/// `executionReport`
#[derive(Debug, Deserialize)]
pub struct ExecutionReportMessage {
    /// Event time (ms).
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Client order id.
    #[serde(rename = "c")]
    pub client_order_id: String,
    /// Side (`BUY` / `SELL`).
    #[serde(rename = "S")]
    pub side: String,
    /// Order type.
    #[serde(rename = "o")]
    pub order_type: String,
    /// Order quantity.
    #[serde(rename = "q")]
    pub quantity: Decimal,
    /// Order price.
    #[serde(rename = "p")]
    pub price: Decimal,
    /// Current order status.
    #[serde(rename = "X")]
    pub status: String,
    /// Order id.
    #[serde(rename = "i")]
    pub order_id: u64,
    /// Cumulative filled quantity.
    #[serde(rename = "z")]
    pub filled_quantity: Decimal,
}

/// `listenKeyExpired`
#[derive(Debug, Deserialize)]
pub struct ListenKeyExpiredMessage {
    /// Event time (ms).
    #[serde(rename = "E")]
    pub event_time: i64,
}
