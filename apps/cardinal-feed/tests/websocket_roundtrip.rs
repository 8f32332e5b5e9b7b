//! WebSocket Transport Integration Tests
//!
//! Runs a session over a real `tokio-tungstenite` connection against a
//! local server speaking the Binance combined-stream format.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use cardinal_feed::infrastructure::binance::BinanceProtocol;
use cardinal_feed::infrastructure::websocket::TungsteniteDialer;
use cardinal_feed::{
    BusConfig, EventBus, SessionConfig, SessionExit, SessionState, StreamSession, TickerPayload,
};

fn trade_json(trade_id: u64) -> String {
    format!(
        r#"{{"stream":"btcusdt@trade","data":{{"e":"trade","E":1700000000001,"s":"BTCUSDT","t":{trade_id},"p":"37000.10","q":"0.015","T":1700000000000,"m":true,"M":true}}}}"#
    )
}

/// Accept one client, probe it, send `trades`, then optionally close.
async fn serve_once(
    listener: TcpListener,
    trades: Vec<String>,
    close_after: bool,
    pong_tx: oneshot::Sender<Vec<u8>>,
) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    ws.send(Message::Ping(b"probe".to_vec().into())).await.unwrap();
    for trade in trades {
        ws.send(Message::Text(trade.into())).await.unwrap();
    }

    let mut pong_tx = Some(pong_tx);
    if close_after {
        let _ = ws
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "maintenance".into(),
            })))
            .await;
    }
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Pong(payload)) => {
                if let Some(tx) = pong_tx.take() {
                    let _ = tx.send(payload.to_vec());
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

fn session_for(addr: std::net::SocketAddr, bus: &Arc<EventBus>) -> StreamSession {
    let config = SessionConfig::new("binance", format!("ws://{addr}/stream?streams=btcusdt@trade"))
        .with_pong_delay(Duration::from_secs(1));
    StreamSession::new(
        config,
        Arc::new(TungsteniteDialer::new(Duration::from_secs(2))),
        Arc::new(BinanceProtocol::new(vec!["btcusdt@trade".to_string()])),
        None,
        Arc::clone(bus),
    )
}

#[tokio::test]
async fn trades_flow_from_socket_to_bus() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (pong_tx, pong_rx) = oneshot::channel();
    let server = tokio::spawn(serve_once(
        listener,
        (1..=3).map(trade_json).collect(),
        false,
        pong_tx,
    ));

    let bus = Arc::new(EventBus::new(BusConfig::new(2, 2)));
    bus.enable_ticker();
    let mut ticker = bus.read_ticker().unwrap();
    let session = session_for(addr, &bus);

    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);

    for expected in 1..=3 {
        let event = tokio::time::timeout(Duration::from_secs(2), ticker.next())
            .await
            .unwrap()
            .unwrap();
        let TickerPayload::Trade(trade) = event.payload() else {
            panic!("expected a trade");
        };
        assert_eq!(trade.trade_id, expected);
        assert_eq!(trade.symbol, "BTCUSDT");
    }

    let pong = tokio::time::timeout(Duration::from_secs(2), pong_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pong, b"probe");

    session.close().await;
    assert_eq!(session.active_tasks(), 0);
    assert_eq!(session.exit_reason(), Some(SessionExit::Cancelled));

    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn server_close_ends_session_as_connection_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (pong_tx, _pong_rx) = oneshot::channel();
    let server = tokio::spawn(serve_once(listener, vec![trade_json(1)], true, pong_tx));

    let bus = Arc::new(EventBus::new(BusConfig::default()));
    bus.enable_ticker();
    let mut ticker = bus.read_ticker().unwrap();
    let session = session_for(addr, &bus);
    session.connect().await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), ticker.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.exchange_name(), "binance");

    let exit = tokio::time::timeout(Duration::from_secs(2), session.wait_closed())
        .await
        .unwrap();
    assert!(matches!(exit, Some(SessionExit::ConnectionLost(ref m)) if m.contains("maintenance")));
    assert_eq!(session.state(), SessionState::Closed);

    let _ = tokio::time::timeout(Duration::from_secs(2), server).await;
}
