//! Scripted transports and listen key sources shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use cardinal_feed::application::ports::{
    AuthError, ConnectionError, InboundFrame, ListenKeySource, StreamConnection, StreamDialer,
};
use cardinal_feed::infrastructure::binance::protocol::BinanceProtocol;
use cardinal_feed::{
    BusConfig, EventBus, ListenKeyConfig, ListenKeyManager, SessionConfig, StreamSession,
};

pub const BASE_URL: &str = "wss://stream.test/stream?streams=btcusdt@trade/btcusdt@depth@100ms";

pub fn trade_frame(trade_id: u64) -> InboundFrame {
    InboundFrame::Text(format!(
        r#"{{"stream":"btcusdt@trade","data":{{"e":"trade","E":1700000000001,"s":"BTCUSDT","t":{trade_id},"p":"37000.10","q":"0.015","T":1700000000000,"m":false,"M":true}}}}"#
    ))
}

pub fn depth_frame() -> InboundFrame {
    InboundFrame::Text(
        r#"{"stream":"btcusdt@depth@100ms","data":{"e":"depthUpdate","E":1700000000000,"s":"BTCUSDT","U":157,"u":160,"b":[["36999.00","10"]],"a":[["37001.00","100"]]}}"#
            .to_string(),
    )
}

pub fn expired_frame() -> InboundFrame {
    InboundFrame::Text(
        r#"{"e":"listenKeyExpired","E":1576653824250,"listenKey":"KEY-1"}"#.to_string(),
    )
}

// =============================================================================
// Connection
// =============================================================================

/// What the session wrote to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Pong(Vec<u8>),
}

/// Test-side handle of a [`ScriptedConnection`].
#[derive(Clone)]
pub struct Remote {
    frames: mpsc::UnboundedSender<Result<InboundFrame, ConnectionError>>,
    sent: Arc<Mutex<Vec<Sent>>>,
    closed: Arc<AtomicBool>,
}

impl Remote {
    pub fn send(&self, frame: InboundFrame) {
        self.frames.send(Ok(frame)).unwrap();
    }

    pub fn fail(&self, message: &str) {
        self.frames
            .send(Err(ConnectionError::Read(message.to_string())))
            .unwrap();
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Connection whose inbound frames are fed by a [`Remote`].
///
/// The stream ends once every `Remote` clone is dropped.
pub struct ScriptedConnection {
    frames: mpsc::UnboundedReceiver<Result<InboundFrame, ConnectionError>>,
    sent: Arc<Mutex<Vec<Sent>>>,
    closed: Arc<AtomicBool>,
    stall_pong: bool,
    stall_close: bool,
}

impl ScriptedConnection {
    pub fn new() -> (Self, Remote) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let remote = Remote {
            frames: tx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        let connection = Self {
            frames: rx,
            sent,
            closed,
            stall_pong: false,
            stall_close: false,
        };
        (connection, remote)
    }

    /// Never complete a pong write.
    #[must_use]
    pub const fn stalling_pongs(mut self) -> Self {
        self.stall_pong = true;
        self
    }

    /// Never complete the close handshake.
    #[must_use]
    pub const fn stalling_close(mut self) -> Self {
        self.stall_close = true;
        self
    }
}

#[async_trait]
impl StreamConnection for ScriptedConnection {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, ConnectionError>> {
        self.frames.recv().await
    }

    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
        self.sent.lock().push(Sent::Text(text));
        Ok(())
    }

    async fn send_pong(&mut self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        if self.stall_pong {
            std::future::pending::<()>().await;
        }
        self.sent.lock().push(Sent::Pong(payload));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if self.stall_close {
            std::future::pending::<()>().await;
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Dialer
// =============================================================================

/// Dialer that hands out queued connections and records every URL.
#[derive(Default)]
pub struct ScriptedDialer {
    queue: Mutex<VecDeque<Result<ScriptedConnection, ConnectionError>>>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedDialer {
    pub fn push(&self, connection: ScriptedConnection) {
        self.queue.lock().push_back(Ok(connection));
    }

    pub fn push_failure(&self, message: &str) {
        self.queue
            .lock()
            .push_back(Err(ConnectionError::Dial(message.to_string())));
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }

    pub fn dial_count(&self) -> usize {
        self.urls.lock().len()
    }
}

#[async_trait]
impl StreamDialer for ScriptedDialer {
    async fn dial(&self, url: &str) -> Result<Box<dyn StreamConnection>, ConnectionError> {
        self.urls.lock().push(url.to_string());
        let next = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ConnectionError::Dial("no scripted connection".to_string())));
        next.map(|connection| Box::new(connection) as Box<dyn StreamConnection>)
    }
}

// =============================================================================
// Listen Key Source
// =============================================================================

/// Listen key source that issues `KEY-1`, `KEY-2`, ... unless told to fail.
#[derive(Default)]
pub struct CountingSource {
    fail: AtomicBool,
    created: AtomicUsize,
    renewed: AtomicUsize,
    closed: Mutex<Vec<String>>,
}

impl CountingSource {
    pub fn failing() -> Self {
        let source = Self::default();
        source.fail.store(true, Ordering::SeqCst);
        source
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn renewed(&self) -> usize {
        self.renewed.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().clone()
    }
}

#[async_trait]
impl ListenKeySource for CountingSource {
    async fn create_listen_key(&self) -> Result<String, AuthError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuthError::Rejected {
                status: 401,
                message: "API-key format invalid.".to_string(),
            });
        }
        Ok(format!("KEY-{n}"))
    }

    async fn keep_alive_listen_key(&self, _key: &str) -> Result<(), AuthError> {
        self.renewed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close_listen_key(&self, key: &str) -> Result<(), AuthError> {
        self.closed.lock().push(key.to_string());
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A session wired to scripted collaborators.
pub struct Harness {
    pub session: Arc<StreamSession>,
    pub dialer: Arc<ScriptedDialer>,
    pub source: Arc<CountingSource>,
    pub keys: Arc<ListenKeyManager>,
    pub bus: Arc<EventBus>,
}

impl Harness {
    pub fn public(config: SessionConfig) -> Self {
        Self::build(config, CountingSource::default())
    }

    pub fn authenticated(config: SessionConfig, source: CountingSource) -> Self {
        Self::build(config.with_authenticated(true), source)
    }

    fn build(config: SessionConfig, source: CountingSource) -> Self {
        let dialer = Arc::new(ScriptedDialer::default());
        let source = Arc::new(source);
        let keys = Arc::new(ListenKeyManager::new(
            "binance",
            Arc::clone(&source) as Arc<dyn ListenKeySource>,
            ListenKeyConfig::new(Duration::from_secs(3600), Duration::from_secs(7200)),
        ));
        let bus = Arc::new(EventBus::new(BusConfig::new(4, 4)));
        let protocol = BinanceProtocol::new(vec![
            "btcusdt@trade".to_string(),
            "btcusdt@depth@100ms".to_string(),
        ]);
        let session = Arc::new(StreamSession::new(
            config,
            Arc::clone(&dialer) as Arc<dyn StreamDialer>,
            Arc::new(protocol),
            Some(Arc::clone(&keys)),
            Arc::clone(&bus),
        ));
        Self {
            session,
            dialer,
            source,
            keys,
            bus,
        }
    }
}

pub fn config() -> SessionConfig {
    SessionConfig::new("binance", BASE_URL).with_pong_delay(Duration::from_millis(100))
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached within two seconds");
}

/// Await `future`, failing the test after two seconds.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}
