//! Market Data Payloads
//!
//! Exchange-neutral payload kinds produced by stream decoders. Every frame a
//! session forwards to the bus is one of these variants, so consumers match
//! on a closed set instead of downcasting an untyped value.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Shared Types
// =============================================================================

/// Side of the aggressor (trades) or of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy side.
    Buy,
    /// Sell side.
    Sell,
}

impl Side {
    /// Parse an exchange side string (`BUY`/`SELL`, any case).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// A single price level in an order book update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price.
    pub price: Decimal,
    /// Quantity resting at the level (zero removes the level).
    pub quantity: Decimal,
}

// =============================================================================
// Ticker Channel Payloads
// =============================================================================

/// An executed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Exchange symbol (upper case, e.g. `BTCUSDT`).
    pub symbol: String,
    /// Exchange trade identifier.
    pub trade_id: u64,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Aggressor side.
    pub side: Side,
    /// Trade time.
    pub timestamp: DateTime<Utc>,
}

/// Top-of-book / rolling ticker update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    /// Exchange symbol.
    pub symbol: String,
    /// Best bid price.
    pub bid_price: Decimal,
    /// Best bid quantity.
    pub bid_quantity: Decimal,
    /// Best ask price.
    pub ask_price: Decimal,
    /// Best ask quantity.
    pub ask_quantity: Decimal,
    /// Last traded price, when the feed carries one.
    pub last_price: Option<Decimal>,
    /// Event time, when the feed carries one.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Payloads carried on the ticker channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickerPayload {
    /// Executed trade.
    Trade(Trade),
    /// Ticker / book ticker update.
    Ticker(Ticker),
}

impl TickerPayload {
    /// Symbol the payload refers to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Trade(t) => &t.symbol,
            Self::Ticker(t) => &t.symbol,
        }
    }

    /// Metric label for the payload kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Trade(_) => "trade",
            Self::Ticker(_) => "ticker",
        }
    }
}

// =============================================================================
// Watcher Channel Payloads
// =============================================================================

/// Incremental order book update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthUpdate {
    /// Exchange symbol.
    pub symbol: String,
    /// First update id in the event.
    pub first_update_id: u64,
    /// Final update id in the event.
    pub final_update_id: u64,
    /// Changed bid levels.
    pub bids: Vec<PriceLevel>,
    /// Changed ask levels.
    pub asks: Vec<PriceLevel>,
    /// Event time.
    pub timestamp: DateTime<Utc>,
}

/// Balance of one asset after an account change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Asset code.
    pub asset: String,
    /// Free balance.
    pub free: Decimal,
    /// Balance locked in open orders.
    pub locked: Decimal,
}

/// Account balance change from an authenticated stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdate {
    /// Changed balances.
    pub balances: Vec<Balance>,
    /// Event time.
    pub timestamp: DateTime<Utc>,
}

/// Order lifecycle update from an authenticated stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// Exchange symbol.
    pub symbol: String,
    /// Exchange order id.
    pub order_id: u64,
    /// Client order id.
    pub client_order_id: String,
    /// Order side.
    pub side: Side,
    /// Order type as reported by the exchange.
    pub order_type: String,
    /// Current order status as reported by the exchange.
    pub status: String,
    /// Limit price (zero for market orders).
    pub price: Decimal,
    /// Original quantity.
    pub quantity: Decimal,
    /// Cumulative filled quantity.
    pub filled_quantity: Decimal,
    /// Event time.
    pub timestamp: DateTime<Utc>,
}

/// The exchange reports the stream's listen key as expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenKeyExpired {
    /// Event time.
    pub timestamp: DateTime<Utc>,
}

/// Payloads carried on the watcher channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatcherPayload {
    /// Order book delta.
    Depth(DepthUpdate),
    /// Account balances.
    Account(AccountUpdate),
    /// Order update.
    Order(OrderUpdate),
    /// Listen key expiry notice.
    ListenKeyExpired(ListenKeyExpired),
}

impl WatcherPayload {
    /// Metric label for the payload kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Depth(_) => "depth",
            Self::Account(_) => "account",
            Self::Order(_) => "order",
            Self::ListenKeyExpired(_) => "listen_key_expired",
        }
    }
}

/// Result of decoding one stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    /// Routed to the ticker channel.
    Ticker(TickerPayload),
    /// Routed to the watcher channel.
    Watcher(WatcherPayload),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_parsing() {
        assert_eq!(Side::parse("BUY"), Some(Side::Buy));
        assert_eq!(Side::parse("sell"), Some(Side::Sell));
        assert_eq!(Side::parse("HOLD"), None);
    }

    #[test]
    fn ticker_payload_symbol_and_kind() {
        let payload = TickerPayload::Ticker(Ticker {
            symbol: "ETHUSDT".to_string(),
            bid_price: Decimal::new(300_001, 2),
            bid_quantity: Decimal::ONE,
            ask_price: Decimal::new(300_002, 2),
            ask_quantity: Decimal::ONE,
            last_price: None,
            timestamp: None,
        });
        assert_eq!(payload.symbol(), "ETHUSDT");
        assert_eq!(payload.kind(), "ticker");
    }

    #[test]
    fn watcher_payload_serializes_with_kind_tag() {
        let payload = WatcherPayload::ListenKeyExpired(ListenKeyExpired {
            timestamp: DateTime::from_timestamp_millis(0).unwrap(),
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "listen_key_expired");
    }
}
