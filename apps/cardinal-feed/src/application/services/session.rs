//! Stream Session
//!
//! One physical streaming connection to one exchange, driven as an explicit
//! state machine (see [`SessionState`]).
//!
//! # Connect
//!
//! 1. Refuse with `NotEnabled` (no I/O) if streaming is disabled
//! 2. If authenticated streams are requested and still permitted, acquire a
//!    listen key and substitute it into the URL's stream parameter. On
//!    failure, downgrade to public streams for the rest of the session
//!    (sticky until [`StreamSession::reset_authenticated`]) and dial the
//!    unmodified URL
//! 3. Dial; a dial failure fails `connect` and leaves nothing running
//! 4. Start the listen key keep-alive when authenticated
//! 5. Start the read loop, which answers liveness probes within
//!    `pong_delay` and forwards decoded frames to the bus
//!
//! # Shutdown
//!
//! A read or liveness failure moves the session to `Degraded`; the read loop
//! then stops the keep-alive task, waits for it, and moves to `Closed`.
//! [`StreamSession::close`] does the same on request. Reconnecting is left to
//! the owner (see `infrastructure::reconnect::SessionSupervisor`).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::listen_key::ListenKeyManager;
use super::tasks::TaskCounter;
use crate::application::ports::{
    ConnectionError, InboundFrame, StreamConnection, StreamDialer, StreamProtocol,
};
use crate::domain::listen_key::ListenKey;
use crate::domain::market::{DecodedFrame, WatcherPayload};
use crate::domain::session::{SessionExit, SessionState};
use crate::infrastructure::bus::{BusError, EventBus};
use crate::infrastructure::metrics;

/// Default delimiter between a stream URL and its stream list.
pub const DEFAULT_STREAM_DELIMITER: &str = "?streams=";

/// Default budget for answering a liveness probe.
pub const DEFAULT_PONG_DELAY: Duration = Duration::from_secs(10);

/// Default silence after which the peer is considered dead.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(10 * 60);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration of one stream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Exchange name stamped on every bus event.
    pub exchange_name: String,
    /// Whether streaming is administratively enabled for the exchange.
    pub enabled: bool,
    /// Base stream URL (public streams).
    pub base_url: String,
    /// Delimiter preceding the stream list in `base_url`.
    pub stream_delimiter: String,
    /// Whether to use the authenticated (listen key) stream.
    pub use_authenticated: bool,
    /// Budget for answering a peer liveness probe.
    pub pong_delay: Duration,
    /// Maximum silence from the peer before the session degrades.
    pub liveness_timeout: Option<Duration>,
}

impl SessionConfig {
    /// Create an enabled, unauthenticated configuration with default timings.
    #[must_use]
    pub fn new(exchange_name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            exchange_name: exchange_name.into(),
            enabled: true,
            base_url: base_url.into(),
            stream_delimiter: DEFAULT_STREAM_DELIMITER.to_string(),
            use_authenticated: false,
            pong_delay: DEFAULT_PONG_DELAY,
            liveness_timeout: Some(DEFAULT_LIVENESS_TIMEOUT),
        }
    }

    /// Set whether streaming is enabled.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Request the authenticated stream.
    #[must_use]
    pub const fn with_authenticated(mut self, use_authenticated: bool) -> Self {
        self.use_authenticated = use_authenticated;
        self
    }

    /// Set the stream list delimiter.
    #[must_use]
    pub fn with_stream_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.stream_delimiter = delimiter.into();
        self
    }

    /// Set the liveness probe reply budget.
    #[must_use]
    pub const fn with_pong_delay(mut self, pong_delay: Duration) -> Self {
        self.pong_delay = pong_delay;
        self
    }

    /// Set the peer silence limit (`None` disables the watchdog).
    #[must_use]
    pub const fn with_liveness_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.liveness_timeout = timeout;
        self
    }
}

/// Substitute `key` for the stream list that follows `delimiter` in `base_url`.
///
/// Everything up to the first occurrence of `delimiter` is kept verbatim;
/// the rest is replaced. If the delimiter is absent it is appended.
///
/// ```rust
/// use cardinal_feed::application::services::rewrite_stream_url;
///
/// assert_eq!(
///     rewrite_stream_url("wss://x/y?streams=OLD", "?streams=", "NEWKEY"),
///     "wss://x/y?streams=NEWKEY"
/// );
/// ```
#[must_use]
pub fn rewrite_stream_url(base_url: &str, delimiter: &str, key: &str) -> String {
    let prefix = if delimiter.is_empty() {
        base_url
    } else {
        base_url
            .split_once(delimiter)
            .map_or(base_url, |(prefix, _)| prefix)
    };
    format!("{prefix}{delimiter}{key}")
}

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Streaming is administratively disabled for the exchange.
    #[error("streaming is not enabled for {0}")]
    NotEnabled(String),

    /// `connect` was called while the session is active.
    #[error("session is already {0}")]
    AlreadyActive(SessionState),

    /// A state change violated the transition table.
    #[error("invalid session transition {from} -> {to}")]
    InvalidTransition {
        /// State before the attempted transition.
        from: SessionState,
        /// Requested state.
        to: SessionState,
    },

    /// The stream endpoint could not be dialed.
    #[error("{exchange} - unable to connect to stream: {source}")]
    Dial {
        /// Exchange name.
        exchange: String,
        /// Transport error.
        #[source]
        source: ConnectionError,
    },

    /// The post-connect subscription could not be sent.
    #[error("{exchange} - unable to subscribe: {source}")]
    Subscribe {
        /// Exchange name.
        exchange: String,
        /// Transport error.
        #[source]
        source: ConnectionError,
    },
}

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug)]
struct SessionShared {
    exchange: String,
    session_id: Uuid,
    state: watch::Sender<SessionState>,
    exit: Mutex<Option<SessionExit>>,
}

impl SessionShared {
    fn new(exchange: String) -> Self {
        Self {
            exchange,
            session_id: Uuid::new_v4(),
            state: watch::Sender::new(SessionState::Disconnected),
            exit: Mutex::new(None),
        }
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn transition(&self, next: SessionState) -> Result<SessionState, SessionError> {
        let mut outcome = Err(SessionError::InvalidTransition {
            from: SessionState::Disconnected,
            to: next,
        });
        self.state.send_if_modified(|current| {
            let from = *current;
            if from.can_transition_to(next) {
                *current = next;
                outcome = Ok(from);
                from != next
            } else {
                outcome = Err(SessionError::InvalidTransition { from, to: next });
                false
            }
        });

        match &outcome {
            Ok(from) => {
                metrics::set_session_state(&self.exchange, next);
                tracing::debug!(
                    exchange = %self.exchange,
                    session_id = %self.session_id,
                    from = %from,
                    to = %next,
                    "Session state changed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    exchange = %self.exchange,
                    session_id = %self.session_id,
                    error = %e,
                    "Rejected session transition"
                );
            }
        }
        outcome
    }
}

struct RunningSession {
    cancel: CancellationToken,
    read_loop: JoinHandle<()>,
}

// =============================================================================
// Stream Session
// =============================================================================

/// A streaming connection to one exchange.
pub struct StreamSession {
    config: SessionConfig,
    dialer: Arc<dyn StreamDialer>,
    protocol: Arc<dyn StreamProtocol>,
    listen_keys: Option<Arc<ListenKeyManager>>,
    bus: Arc<EventBus>,
    shared: Arc<SessionShared>,
    can_use_authenticated: AtomicBool,
    authenticated: AtomicBool,
    tasks: TaskCounter,
    running: tokio::sync::Mutex<Option<RunningSession>>,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("exchange", &self.config.exchange_name)
            .field("session_id", &self.shared.session_id)
            .field("state", &self.state())
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl StreamSession {
    /// Create a session. Nothing is dialed until [`Self::connect`].
    #[must_use]
    pub fn new(
        config: SessionConfig,
        dialer: Arc<dyn StreamDialer>,
        protocol: Arc<dyn StreamProtocol>,
        listen_keys: Option<Arc<ListenKeyManager>>,
        bus: Arc<EventBus>,
    ) -> Self {
        let can_use_authenticated = config.use_authenticated && listen_keys.is_some();
        let shared = Arc::new(SessionShared::new(config.exchange_name.clone()));
        Self {
            config,
            dialer,
            protocol,
            listen_keys,
            bus,
            shared,
            can_use_authenticated: AtomicBool::new(can_use_authenticated),
            authenticated: AtomicBool::new(false),
            tasks: TaskCounter::new(),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Exchange name.
    #[must_use]
    pub fn exchange_name(&self) -> &str {
        &self.config.exchange_name
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Unique id of this session (for log correlation).
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.shared.session_id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Why the last run stopped, once it has.
    #[must_use]
    pub fn exit_reason(&self) -> Option<SessionExit> {
        self.shared.exit.lock().clone()
    }

    /// Whether the current connection uses a listen key.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Whether authenticated streams may still be attempted.
    #[must_use]
    pub fn can_use_authenticated(&self) -> bool {
        self.can_use_authenticated.load(Ordering::SeqCst)
    }

    /// Lift a previous authentication downgrade.
    pub fn reset_authenticated(&self) {
        let permitted = self.config.use_authenticated && self.listen_keys.is_some();
        self.can_use_authenticated.store(permitted, Ordering::SeqCst);
    }

    /// Number of live background tasks (read loop and keep-alive).
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.tasks.active()
    }

    /// Establish the connection and start the background tasks.
    ///
    /// # Errors
    ///
    /// - `NotEnabled` if streaming is disabled (no I/O performed)
    /// - `AlreadyActive` if the session is not idle
    /// - `Dial` / `Subscribe` if the transport fails; nothing is left running
    pub async fn connect(&self) -> Result<(), SessionError> {
        if !self.config.enabled {
            return Err(SessionError::NotEnabled(self.config.exchange_name.clone()));
        }

        let mut running = self.running.lock().await;
        let state = self.state();
        if !state.can_connect() {
            return Err(SessionError::AlreadyActive(state));
        }

        // A previous run that ended on its own leaves a finished handle behind.
        if let Some(previous) = running.take() {
            previous.cancel.cancel();
            let _ = previous.read_loop.await;
        }
        if state == SessionState::Closed {
            self.shared.transition(SessionState::Disconnected)?;
        }
        self.shared.exit.lock().take();
        self.authenticated.store(false, Ordering::SeqCst);

        let key = self.acquire_listen_key().await?;
        let url = key.as_ref().map_or_else(
            || self.config.base_url.clone(),
            |key| {
                rewrite_stream_url(
                    &self.config.base_url,
                    &self.config.stream_delimiter,
                    key.value(),
                )
            },
        );
        let authenticated = key.is_some();

        tracing::info!(
            exchange = %self.config.exchange_name,
            session_id = %self.shared.session_id,
            url = %self.config.base_url,
            authenticated,
            "Connecting to stream"
        );

        let mut connection = match self.dialer.dial(&url).await {
            Ok(connection) => connection,
            Err(source) => {
                return Err(self.abort_connect(
                    authenticated,
                    SessionError::Dial {
                        exchange: self.config.exchange_name.clone(),
                        source,
                    },
                ));
            }
        };

        for message in self.protocol.subscribe_messages(authenticated) {
            if let Err(source) = connection.send_text(message).await {
                let _ = connection.close().await;
                return Err(self.abort_connect(
                    authenticated,
                    SessionError::Subscribe {
                        exchange: self.config.exchange_name.clone(),
                        source,
                    },
                ));
            }
        }

        self.shared.transition(SessionState::Connected)?;
        self.authenticated.store(authenticated, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let keepalive = match (key, &self.listen_keys) {
            (Some(key), Some(manager)) => {
                Some(manager.spawn_keepalive(key, cancel.child_token(), &self.tasks))
            }
            _ => None,
        };

        let read_loop = ReadLoop {
            shared: Arc::clone(&self.shared),
            connection,
            protocol: Arc::clone(&self.protocol),
            bus: Arc::clone(&self.bus),
            listen_keys: self.listen_keys.clone(),
            pong_delay: self.config.pong_delay,
            liveness_timeout: self.config.liveness_timeout,
            cancel: cancel.clone(),
            keepalive,
        };
        let span = tracing::info_span!(
            "stream_session",
            exchange = %self.config.exchange_name,
            session_id = %self.shared.session_id,
        );
        let read_loop = self.tasks.spawn(read_loop.run().instrument(span));

        *running = Some(RunningSession { cancel, read_loop });

        tracing::info!(
            exchange = %self.config.exchange_name,
            session_id = %self.shared.session_id,
            authenticated,
            "Stream session connected"
        );
        Ok(())
    }

    /// Stop the background tasks and wait for them, ending in `Closed`.
    pub async fn close(&self) {
        let mut running = self.running.lock().await;
        if let Some(run) = running.take() {
            run.cancel.cancel();
            if let Err(e) = run.read_loop.await
                && e.is_panic()
            {
                tracing::error!(
                    exchange = %self.config.exchange_name,
                    session_id = %self.shared.session_id,
                    "Read loop panicked"
                );
            }
        }

        if self.state() != SessionState::Closed {
            let _ = self.shared.transition(SessionState::Closed);
        }
        if let Some(manager) = &self.listen_keys {
            manager.release().await;
        }
        self.authenticated.store(false, Ordering::SeqCst);
    }

    /// Wait until the session reaches `Closed` and return the exit reason.
    ///
    /// A session that was never connected stays `Disconnected` and this
    /// future does not resolve until it is closed.
    pub async fn wait_closed(&self) -> Option<SessionExit> {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
        self.exit_reason()
    }

    /// Acquire a listen key if authenticated streams are requested and permitted.
    ///
    /// An acquisition failure downgrades the session to public streams.
    async fn acquire_listen_key(&self) -> Result<Option<ListenKey>, SessionError> {
        let Some(manager) = &self.listen_keys else {
            return Ok(None);
        };
        if !self.config.use_authenticated || !self.can_use_authenticated() {
            return Ok(None);
        }

        self.shared.transition(SessionState::Authenticating)?;
        match manager.acquire().await {
            Ok(key) => Ok(Some(key)),
            Err(e) => {
                self.can_use_authenticated.store(false, Ordering::SeqCst);
                metrics::record_auth_downgrade(&self.config.exchange_name);
                tracing::error!(
                    exchange = %self.config.exchange_name,
                    session_id = %self.shared.session_id,
                    error = %e,
                    "Unable to connect to authenticated stream; continuing with public streams"
                );
                Ok(None)
            }
        }
    }

    fn abort_connect(&self, authenticated: bool, error: SessionError) -> SessionError {
        if authenticated && let Some(manager) = &self.listen_keys {
            manager.invalidate();
        }
        if self.state() == SessionState::Authenticating {
            let _ = self.shared.transition(SessionState::Disconnected);
        }
        tracing::error!(
            exchange = %self.config.exchange_name,
            session_id = %self.shared.session_id,
            error = %error,
            "Stream connect failed"
        );
        error
    }
}

// =============================================================================
// Read Loop
// =============================================================================

struct ReadLoop {
    shared: Arc<SessionShared>,
    connection: Box<dyn StreamConnection>,
    protocol: Arc<dyn StreamProtocol>,
    bus: Arc<EventBus>,
    listen_keys: Option<Arc<ListenKeyManager>>,
    pong_delay: Duration,
    liveness_timeout: Option<Duration>,
    cancel: CancellationToken,
    keepalive: Option<JoinHandle<()>>,
}

impl ReadLoop {
    async fn run(mut self) {
        let exit = self.pump().await;

        if exit.is_failure() {
            let _ = self.shared.transition(SessionState::Degraded);
            tracing::warn!(exit = %exit, "Stream session degraded");
        }

        self.cancel.cancel();
        if let Some(keepalive) = self.keepalive.take() {
            let _ = keepalive.await;
        }
        let _ = tokio::time::timeout(self.pong_delay, self.connection.close()).await;

        metrics::record_session_exit(&self.shared.exchange, &exit);
        *self.shared.exit.lock() = Some(exit);
        let _ = self.shared.transition(SessionState::Closed);
        tracing::info!("Stream session closed");
    }

    async fn pump(&mut self) -> SessionExit {
        let cancel = self.cancel.clone();
        let mut last_frame = Instant::now();

        loop {
            // An unrepresentable deadline means no deadline.
            let deadline = self
                .liveness_timeout
                .and_then(|limit| last_frame.checked_add(limit));
            let frame = tokio::select! {
                () = cancel.cancelled() => return SessionExit::Cancelled,
                () = sleep_until(deadline) => {
                    let silent_for = last_frame.elapsed();
                    tracing::warn!(silent_secs = silent_for.as_secs(), "Peer went silent");
                    return SessionExit::LivenessTimeout(silent_for);
                }
                frame = self.connection.next_frame() => frame,
            };
            last_frame = Instant::now();

            let frame = match frame {
                None => return SessionExit::ConnectionLost("stream ended".to_string()),
                Some(Err(e)) => return SessionExit::ConnectionLost(e.to_string()),
                Some(Ok(frame)) => frame,
            };

            let outcome = match frame {
                InboundFrame::Text(text) => self.dispatch(text.as_bytes(), &cancel).await,
                InboundFrame::Binary(data) => self.dispatch(&data, &cancel).await,
                InboundFrame::Ping(payload) => self.answer_probe(payload).await,
                InboundFrame::Pong(_) => Ok(()),
                InboundFrame::Close(reason) => Err(SessionExit::ConnectionLost(format!(
                    "peer closed: {}",
                    reason.unwrap_or_default()
                ))),
            };
            if let Err(exit) = outcome {
                return exit;
            }
        }
    }

    /// Reply to a liveness probe within the configured delay.
    async fn answer_probe(&mut self, payload: Vec<u8>) -> Result<(), SessionExit> {
        match tokio::time::timeout(self.pong_delay, self.connection.send_pong(payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionExit::ConnectionLost(e.to_string())),
            Err(_) => {
                tracing::warn!(
                    delay_ms = self.pong_delay.as_millis(),
                    "Liveness reply missed its deadline"
                );
                Err(SessionExit::LivenessTimeout(self.pong_delay))
            }
        }
    }

    /// Decode one data frame and forward it to the bus.
    async fn dispatch(
        &mut self,
        raw: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), SessionExit> {
        let exchange = self.shared.exchange.as_str();
        metrics::record_frame_received(exchange);

        let decoded = match self.protocol.decode(raw) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return Ok(()),
            Err(e) => {
                metrics::record_decode_error(exchange);
                tracing::warn!(error = %e, bytes = raw.len(), "Dropping undecodable frame");
                return Ok(());
            }
        };

        let pushed = match decoded {
            DecodedFrame::Ticker(payload) => {
                if !self.bus.is_ticker_enabled() {
                    return Ok(());
                }
                tokio::select! {
                    () = cancel.cancelled() => return Err(SessionExit::Cancelled),
                    pushed = self.bus.push_trade(exchange, payload) => pushed,
                }
            }
            DecodedFrame::Watcher(payload) => {
                if matches!(payload, WatcherPayload::ListenKeyExpired(_))
                    && let Some(manager) = &self.listen_keys
                {
                    tracing::warn!("Exchange reported listen key expired");
                    manager.invalidate();
                }
                if !self.bus.is_watcher_enabled() {
                    return Ok(());
                }
                tokio::select! {
                    () = cancel.cancelled() => return Err(SessionExit::Cancelled),
                    pushed = self.bus.push_watcher(exchange, payload) => pushed,
                }
            }
        };

        match pushed {
            Ok(()) => Ok(()),
            Err(BusError::Closed(channel)) => {
                tracing::warn!(channel = %channel, "Bus consumer has gone away");
                Err(SessionExit::ConsumerGone)
            }
            Err(e) => {
                tracing::error!(error = %e, "Bus rejected event");
                Ok(())
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
