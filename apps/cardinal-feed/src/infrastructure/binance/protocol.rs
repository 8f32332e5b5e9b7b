//! Binance Stream Protocol
//!
//! Decodes combined-stream and raw frames into bus payloads. Dispatch is on
//! the `e` field of the event; book ticker events carry no `e` and are
//! recognized by shape.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::messages::{
    AccountPositionMessage, BookTickerMessage, CombinedEnvelope, ControlReply, DailyTickerMessage,
    DepthUpdateMessage, ExecutionReportMessage, ListenKeyExpiredMessage, SubscribeRequest,
    TradeMessage,
};
use crate::application::ports::{DecodeError, StreamProtocol};
use crate::domain::market::{
    AccountUpdate, Balance, DecodedFrame, DepthUpdate, ListenKeyExpired, OrderUpdate, PriceLevel,
    Side, Ticker, TickerPayload, Trade, WatcherPayload,
};

/// Decoder for Binance spot streams.
#[derive(Debug, Clone, Default)]
pub struct BinanceProtocol {
    streams: Vec<String>,
}

impl BinanceProtocol {
    /// Create a decoder. `streams` are re-subscribed when the URL's stream
    /// list was replaced by a listen key.
    #[must_use]
    pub const fn new(streams: Vec<String>) -> Self {
        Self { streams }
    }

    /// Market streams subscribed after an authenticated connect.
    #[must_use]
    pub fn streams(&self) -> &[String] {
        &self.streams
    }
}

impl StreamProtocol for BinanceProtocol {
    fn decode(&self, raw: &[u8]) -> Result<Option<DecodedFrame>, DecodeError> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        decode_value(value)
    }

    fn subscribe_messages(&self, authenticated: bool) -> Vec<String> {
        if !authenticated || self.streams.is_empty() {
            return Vec::new();
        }
        match serde_json::to_string(&SubscribeRequest::new(self.streams.clone(), 1)) {
            Ok(message) => vec![message],
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode subscribe request");
                Vec::new()
            }
        }
    }
}

fn decode_value(value: Value) -> Result<Option<DecodedFrame>, DecodeError> {
    let Value::Object(ref object) = value else {
        return Err(DecodeError::Malformed("expected a JSON object".to_string()));
    };

    if object.contains_key("data") && object.contains_key("stream") {
        let envelope: CombinedEnvelope = parse(value)?;
        return decode_event(envelope.data);
    }

    if object.contains_key("id") && (object.contains_key("result") || object.contains_key("error"))
    {
        let reply: ControlReply = parse(value)?;
        return match reply.error {
            Some(error) => Err(DecodeError::Malformed(format!(
                "request {} failed ({}): {}",
                reply.id, error.code, error.msg
            ))),
            None => Ok(None),
        };
    }

    decode_event(value)
}

fn decode_event(data: Value) -> Result<Option<DecodedFrame>, DecodeError> {
    let event_type = data.get("e").and_then(Value::as_str).map(str::to_owned);

    let frame = match event_type.as_deref() {
        Some("trade") => DecodedFrame::Ticker(TickerPayload::Trade(trade(parse(data)?)?)),
        Some("24hrTicker") => {
            DecodedFrame::Ticker(TickerPayload::Ticker(daily_ticker(parse(data)?)?))
        }
        Some("depthUpdate") => DecodedFrame::Watcher(WatcherPayload::Depth(depth(parse(data)?)?)),
        Some("outboundAccountPosition") => {
            DecodedFrame::Watcher(WatcherPayload::Account(account(parse(data)?)?))
        }
        Some("executionReport") => {
            DecodedFrame::Watcher(WatcherPayload::Order(order(parse(data)?)?))
        }
        Some("listenKeyExpired") => {
            let message: ListenKeyExpiredMessage = parse(data)?;
            DecodedFrame::Watcher(WatcherPayload::ListenKeyExpired(ListenKeyExpired {
                timestamp: timestamp("E", message.event_time)?,
            }))
        }
        Some(other) => return Err(DecodeError::UnknownEvent(other.to_string())),
        None if is_book_ticker(&data) => {
            DecodedFrame::Ticker(TickerPayload::Ticker(book_ticker(parse(data)?)))
        }
        None => return Err(DecodeError::UnknownEvent("<missing>".to_string())),
    };
    Ok(Some(frame))
}

fn is_book_ticker(data: &Value) -> bool {
    ["u", "s", "b", "B", "a", "A"]
        .iter()
        .all(|key| data.get(key).is_some())
}

fn parse<T: DeserializeOwned>(value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
}

fn timestamp(field: &'static str, millis: i64) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| DecodeError::InvalidField {
        field,
        reason: format!("timestamp {millis} out of range"),
    })
}

// =============================================================================
// Conversions
// =============================================================================

fn trade(message: TradeMessage) -> Result<Trade, DecodeError> {
    // The aggressor is the seller when the buyer was resting on the book.
    let side = if message.buyer_is_maker {
        Side::Sell
    } else {
        Side::Buy
    };
    Ok(Trade {
        symbol: message.symbol,
        trade_id: message.trade_id,
        price: message.price,
        quantity: message.quantity,
        side,
        timestamp: timestamp("T", message.trade_time)?,
    })
}

fn daily_ticker(message: DailyTickerMessage) -> Result<Ticker, DecodeError> {
    Ok(Ticker {
        symbol: message.symbol,
        bid_price: message.bid_price,
        bid_quantity: message.bid_quantity,
        ask_price: message.ask_price,
        ask_quantity: message.ask_quantity,
        last_price: Some(message.last_price),
        timestamp: Some(timestamp("E", message.event_time)?),
    })
}

fn book_ticker(message: BookTickerMessage) -> Ticker {
    Ticker {
        symbol: message.symbol,
        bid_price: message.bid_price,
        bid_quantity: message.bid_quantity,
        ask_price: message.ask_price,
        ask_quantity: message.ask_quantity,
        last_price: None,
        timestamp: None,
    }
}

fn levels(raw: Vec<(rust_decimal::Decimal, rust_decimal::Decimal)>) -> Vec<PriceLevel> {
    raw.into_iter()
        .map(|(price, quantity)| PriceLevel { price, quantity })
        .collect()
}

fn depth(message: DepthUpdateMessage) -> Result<DepthUpdate, DecodeError> {
    Ok(DepthUpdate {
        symbol: message.symbol,
        first_update_id: message.first_update_id,
        final_update_id: message.final_update_id,
        bids: levels(message.bids),
        asks: levels(message.asks),
        timestamp: timestamp("E", message.event_time)?,
    })
}

fn account(message: AccountPositionMessage) -> Result<AccountUpdate, DecodeError> {
    Ok(AccountUpdate {
        balances: message
            .balances
            .into_iter()
            .map(|b| Balance {
                asset: b.asset,
                free: b.free,
                locked: b.locked,
            })
            .collect(),
        timestamp: timestamp("E", message.event_time)?,
    })
}

fn order(message: ExecutionReportMessage) -> Result<OrderUpdate, DecodeError> {
    let side = Side::parse(&message.side).ok_or_else(|| DecodeError::InvalidField {
        field: "S",
        reason: format!("unknown side {:?}", message.side),
    })?;
    Ok(OrderUpdate {
        symbol: message.symbol,
        order_id: message.order_id,
        client_order_id: message.client_order_id,
        side,
        order_type: message.order_type,
        status: message.status,
        price: message.price,
        quantity: message.quantity,
        filled_quantity: message.filled_quantity,
        timestamp: timestamp("E", message.event_time)?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use test_case::test_case;

    use super::*;

    fn decode(raw: &str) -> Result<Option<DecodedFrame>, DecodeError> {
        BinanceProtocol::default().decode(raw.as_bytes())
    }

    const TRADE: &str = r#"{"stream":"btcusdt@trade","data":{"e":"trade","E":1700000000001,"s":"BTCUSDT","t":42,"p":"37000.10","q":"0.015","T":1700000000000,"m":true,"M":true}}"#;
    const BOOK_TICKER: &str = r#"{"stream":"btcusdt@bookTicker","data":{"u":400900217,"s":"BTCUSDT","b":"36999.99","B":"1.5","a":"37000.01","A":"2.25"}}"#;
    const DAILY_TICKER: &str = r#"{"e":"24hrTicker","E":1700000000000,"s":"ETHUSDT","p":"1.0","P":"0.05","c":"2000.5","Q":"1","b":"2000.4","B":"3","a":"2000.6","A":"4","o":"1999","h":"2010","l":"1990","v":"100","q":"200000","O":0,"C":1,"F":0,"L":10,"n":11}"#;
    const DEPTH: &str = r#"{"stream":"btcusdt@depth@100ms","data":{"e":"depthUpdate","E":1700000000000,"s":"BTCUSDT","U":157,"u":160,"b":[["36999.00","10"]],"a":[["37001.00","100"],["37002.00","0"]]}}"#;
    const ACCOUNT: &str = r#"{"stream":"pqia91ma19a5s61cv6a81va65sdf19v8a65a1a5s61cv6a81va65sdf19v8a65a1","data":{"e":"outboundAccountPosition","E":1564034571105,"u":1564034571073,"B":[{"a":"ETH","f":"10000.000000","l":"0.000000"}]}}"#;
    const ORDER: &str = r#"{"e":"executionReport","E":1499405658658,"s":"ETHBTC","c":"mUvoqJxFIILMdfAW5iGSOW","S":"BUY","o":"LIMIT","f":"GTC","q":"1.00000000","p":"0.10264410","P":"0.00000000","F":"0.00000000","g":-1,"C":"","x":"NEW","X":"NEW","r":"NONE","i":4293153,"l":"0.00000000","z":"0.00000000","L":"0.00000000","n":"0","N":null,"T":1499405658657,"t":-1,"I":8641984,"w":true,"m":false,"M":false,"O":1499405658657,"Z":"0.00000000","Y":"0.00000000","Q":"0.00000000"}"#;
    const EXPIRED: &str = r#"{"e":"listenKeyExpired","E":1576653824250,"listenKey":"OfYGbUzi3PraNagEkdKuFwUHn48brFsItTdsuiIXrucEvD0rhRXZ7I6URWfE8YE8"}"#;

    #[test]
    fn trade_frame_is_ticker_channel() {
        let Some(DecodedFrame::Ticker(TickerPayload::Trade(trade))) = decode(TRADE).unwrap() else {
            panic!("expected trade");
        };
        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.trade_id, 42);
        assert_eq!(trade.price, Decimal::new(3_700_010, 2));
        assert_eq!(trade.quantity, Decimal::new(15, 3));
        assert_eq!(trade.side, Side::Sell);
        assert_eq!(trade.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn book_ticker_is_recognized_by_shape() {
        let Some(DecodedFrame::Ticker(TickerPayload::Ticker(ticker))) =
            decode(BOOK_TICKER).unwrap()
        else {
            panic!("expected ticker");
        };
        assert_eq!(ticker.bid_price, Decimal::new(3_699_999, 2));
        assert_eq!(ticker.ask_quantity, Decimal::new(225, 2));
        assert_eq!(ticker.last_price, None);
        assert_eq!(ticker.timestamp, None);
    }

    #[test]
    fn daily_ticker_carries_last_price() {
        let Some(DecodedFrame::Ticker(TickerPayload::Ticker(ticker))) =
            decode(DAILY_TICKER).unwrap()
        else {
            panic!("expected ticker");
        };
        assert_eq!(ticker.symbol, "ETHUSDT");
        assert_eq!(ticker.last_price, Some(Decimal::new(20_005, 1)));
        assert!(ticker.timestamp.is_some());
    }

    #[test]
    fn depth_update_levels() {
        let Some(DecodedFrame::Watcher(WatcherPayload::Depth(depth))) = decode(DEPTH).unwrap()
        else {
            panic!("expected depth");
        };
        assert_eq!(depth.first_update_id, 157);
        assert_eq!(depth.final_update_id, 160);
        assert_eq!(depth.bids.len(), 1);
        assert_eq!(depth.asks[1].quantity, Decimal::ZERO);
    }

    #[test]
    fn order_update_fields() {
        let Some(DecodedFrame::Watcher(WatcherPayload::Order(order))) = decode(ORDER).unwrap()
        else {
            panic!("expected order");
        };
        assert_eq!(order.order_id, 4_293_153);
        assert_eq!(order.client_order_id, "mUvoqJxFIILMdfAW5iGSOW");
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.status, "NEW");
        assert_eq!(order.order_type, "LIMIT");
    }

    #[test_case(TRADE, "trade" ; "trade")]
    #[test_case(BOOK_TICKER, "ticker" ; "book ticker")]
    #[test_case(DAILY_TICKER, "ticker" ; "daily ticker")]
    fn ticker_channel_kinds(raw: &str, kind: &str) {
        match decode(raw).unwrap() {
            Some(DecodedFrame::Ticker(payload)) => assert_eq!(payload.kind(), kind),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test_case(DEPTH, "depth" ; "depth")]
    #[test_case(ACCOUNT, "account" ; "account position")]
    #[test_case(ORDER, "order" ; "execution report")]
    #[test_case(EXPIRED, "listen_key_expired" ; "listen key expired")]
    fn watcher_channel_kinds(raw: &str, kind: &str) {
        match decode(raw).unwrap() {
            Some(DecodedFrame::Watcher(payload)) => assert_eq!(payload.kind(), kind),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn subscription_ack_is_control_frame() {
        assert_eq!(decode(r#"{"result":null,"id":1}"#), Ok(None));
    }

    #[test]
    fn subscription_error_is_reported() {
        let result = decode(r#"{"error":{"code":2,"msg":"Invalid request"},"id":1}"#);
        assert!(matches!(result, Err(DecodeError::Malformed(msg)) if msg.contains("Invalid request")));
    }

    #[test_case("not json" ; "garbage")]
    #[test_case("[1,2,3]" ; "array")]
    #[test_case(r#"{"stream":"x@trade","data":{"e":"trade","s":"BTCUSDT"}}"# ; "missing fields")]
    fn malformed_frames(raw: &str) {
        assert!(matches!(decode(raw), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn unknown_event_type() {
        assert_eq!(
            decode(r#"{"e":"kline","E":1,"s":"BTCUSDT"}"#),
            Err(DecodeError::UnknownEvent("kline".to_string()))
        );
    }

    #[test]
    fn unknown_side_is_invalid_field() {
        let raw = ORDER.replace(r#""S":"BUY""#, r#""S":"HOLD""#);
        assert!(matches!(
            decode(&raw),
            Err(DecodeError::InvalidField { field: "S", .. })
        ));
    }

    #[test]
    fn subscribe_only_when_stream_list_was_replaced() {
        let protocol = BinanceProtocol::new(vec!["btcusdt@trade".to_string()]);
        assert!(protocol.subscribe_messages(false).is_empty());

        let messages = protocol.subscribe_messages(true);
        assert_eq!(messages.len(), 1);
        let json: serde_json::Value = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(json["method"], "SUBSCRIBE");
        assert_eq!(json["params"][0], "btcusdt@trade");
        assert_eq!(json["id"], 1);
    }
}
