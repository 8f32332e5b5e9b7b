//! Event Bus
//!
//! Fan-in distribution point between any number of stream sessions and the
//! single consumer pipeline.
//!
//! # Architecture
//!
//! The `EventBus` holds two independent conduits:
//! - **ticker**: trades and price updates ([`TickerEvent`])
//! - **watcher**: order book, account and order updates ([`WatcherEvent`])
//!
//! Each conduit starts disabled and is allocated at most once, by the first
//! `enable_*` call, under a one-time initialization guard. Conduits are
//! bounded (capacity 1 by default), so a push waits until the consumer has
//! room: a slow consumer throttles every producing session equally instead
//! of letting memory grow.
//!
//! ```text
//! Binance session ──┐
//!                   │     ┌──────────────┐
//! Kraken session ───┼────►│ ticker  (N)  │────► consumer
//!                   │     │ watcher (N)  │────► consumer
//! ... session ──────┘     └──────────────┘
//! ```

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::domain::events::{TickerEvent, WatcherEvent};
use crate::domain::market::{TickerPayload, WatcherPayload};
use crate::infrastructure::metrics::{self, BusChannel};

// =============================================================================
// Configuration
// =============================================================================

/// Conduit capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Capacity of the ticker conduit.
    pub ticker_capacity: usize,
    /// Capacity of the watcher conduit.
    pub watcher_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            ticker_capacity: 1,
            watcher_capacity: 1,
        }
    }
}

impl BusConfig {
    /// Create a configuration with explicit capacities (clamped to at least 1).
    #[must_use]
    pub fn new(ticker_capacity: usize, watcher_capacity: usize) -> Self {
        Self {
            ticker_capacity: ticker_capacity.max(1),
            watcher_capacity: watcher_capacity.max(1),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Event bus errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// The ticker conduit was never enabled.
    #[error("ticker bus is not enabled")]
    TickerDisabled,

    /// The watcher conduit was never enabled.
    #[error("watcher bus is not enabled")]
    WatcherDisabled,

    /// The consumer dropped its receiver.
    #[error("{0} bus consumer has gone away")]
    Closed(BusChannel),

    /// The receiver was already handed to a consumer.
    #[error("{0} bus reader already taken")]
    ReaderTaken(BusChannel),
}

// =============================================================================
// Conduit
// =============================================================================

/// Receive side of the ticker conduit.
pub type TickerStream = ReceiverStream<TickerEvent>;

/// Receive side of the watcher conduit.
pub type WatcherStream = ReceiverStream<WatcherEvent>;

#[derive(Debug)]
struct Conduit<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<Option<mpsc::Receiver<T>>>,
    capacity: usize,
}

impl<T> Conduit<T> {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            capacity,
        }
    }

    fn in_flight(&self) -> usize {
        self.capacity - self.tx.capacity()
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Central fan-in bus with two lazily enabled, bounded conduits.
///
/// # Example
///
/// ```rust
/// use cardinal_feed::infrastructure::bus::{BusConfig, EventBus};
///
/// let bus = EventBus::new(BusConfig::default());
/// assert!(!bus.is_ticker_enabled());
///
/// bus.enable_ticker();
/// bus.enable_ticker(); // no-op
/// assert!(bus.is_ticker_enabled());
/// assert!(!bus.is_watcher_enabled());
/// ```
#[derive(Debug, Default)]
pub struct EventBus {
    config: BusConfig,
    ticker: OnceLock<Conduit<TickerEvent>>,
    watcher: OnceLock<Conduit<WatcherEvent>>,
}

impl EventBus {
    /// Create a bus with both conduits disabled.
    #[must_use]
    pub const fn new(config: BusConfig) -> Self {
        Self {
            config,
            ticker: OnceLock::new(),
            watcher: OnceLock::new(),
        }
    }

    /// Conduit capacities this bus allocates with.
    #[must_use]
    pub const fn config(&self) -> &BusConfig {
        &self.config
    }

    // =========================================================================
    // Ticker Conduit
    // =========================================================================

    /// Enable the ticker conduit.
    ///
    /// Idempotent: returns `true` only for the call that allocated the
    /// conduit. Concurrent first calls allocate exactly once.
    pub fn enable_ticker(&self) -> bool {
        let mut allocated = false;
        self.ticker.get_or_init(|| {
            allocated = true;
            Conduit::new(self.config.ticker_capacity)
        });
        if allocated {
            tracing::info!(capacity = self.config.ticker_capacity, "Ticker bus enabled");
        }
        allocated
    }

    /// Whether the ticker conduit has been enabled.
    #[must_use]
    pub fn is_ticker_enabled(&self) -> bool {
        self.ticker.get().is_some()
    }

    /// Push a trade or ticker payload from `exchange_name`.
    ///
    /// Waits while the conduit is full.
    ///
    /// # Errors
    ///
    /// Returns `BusError::TickerDisabled` if the ticker conduit was never
    /// enabled (nothing is sent), or `BusError::Closed` if the consumer is gone.
    pub async fn push_trade(
        &self,
        exchange_name: &str,
        payload: TickerPayload,
    ) -> Result<(), BusError> {
        let Some(conduit) = self.ticker.get() else {
            metrics::record_bus_rejected(BusChannel::Ticker);
            tracing::error!(
                exchange = exchange_name,
                "Ticker event pushed while ticker bus is disabled; dropping"
            );
            return Err(BusError::TickerDisabled);
        };

        let kind = payload.kind();
        let started = Instant::now();
        conduit
            .tx
            .send(TickerEvent::new(exchange_name, payload))
            .await
            .map_err(|_| BusError::Closed(BusChannel::Ticker))?;

        metrics::record_bus_event(BusChannel::Ticker, exchange_name, kind);
        metrics::record_backpressure_wait(BusChannel::Ticker, started.elapsed());
        Ok(())
    }

    /// Take the receive side of the ticker conduit.
    ///
    /// There is exactly one consumer; the stream ends when the bus is dropped.
    ///
    /// # Errors
    ///
    /// Returns `BusError::TickerDisabled` if not enabled, or
    /// `BusError::ReaderTaken` on a second call.
    pub fn read_ticker(&self) -> Result<TickerStream, BusError> {
        let conduit = self.ticker.get().ok_or(BusError::TickerDisabled)?;
        conduit
            .rx
            .lock()
            .take()
            .map(ReceiverStream::new)
            .ok_or(BusError::ReaderTaken(BusChannel::Ticker))
    }

    // =========================================================================
    // Watcher Conduit
    // =========================================================================

    /// Enable the watcher conduit. Same contract as [`Self::enable_ticker`].
    pub fn enable_watcher(&self) -> bool {
        let mut allocated = false;
        self.watcher.get_or_init(|| {
            allocated = true;
            Conduit::new(self.config.watcher_capacity)
        });
        if allocated {
            tracing::info!(capacity = self.config.watcher_capacity, "Watcher bus enabled");
        }
        allocated
    }

    /// Whether the watcher conduit has been enabled.
    #[must_use]
    pub fn is_watcher_enabled(&self) -> bool {
        self.watcher.get().is_some()
    }

    /// Push a non-trade payload from `exchange_name`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::WatcherDisabled` if the watcher conduit was never
    /// enabled, or `BusError::Closed` if the consumer is gone.
    pub async fn push_watcher(
        &self,
        exchange_name: &str,
        payload: WatcherPayload,
    ) -> Result<(), BusError> {
        let Some(conduit) = self.watcher.get() else {
            metrics::record_bus_rejected(BusChannel::Watcher);
            tracing::error!(
                exchange = exchange_name,
                "Watcher event pushed while watcher bus is disabled; dropping"
            );
            return Err(BusError::WatcherDisabled);
        };

        let kind = payload.kind();
        let started = Instant::now();
        conduit
            .tx
            .send(WatcherEvent::new(exchange_name, payload))
            .await
            .map_err(|_| BusError::Closed(BusChannel::Watcher))?;

        metrics::record_bus_event(BusChannel::Watcher, exchange_name, kind);
        metrics::record_backpressure_wait(BusChannel::Watcher, started.elapsed());
        Ok(())
    }

    /// Take the receive side of the watcher conduit.
    ///
    /// # Errors
    ///
    /// Returns `BusError::WatcherDisabled` if not enabled, or
    /// `BusError::ReaderTaken` on a second call.
    pub fn read_watcher(&self) -> Result<WatcherStream, BusError> {
        let conduit = self.watcher.get().ok_or(BusError::WatcherDisabled)?;
        conduit
            .rx
            .lock()
            .take()
            .map(ReceiverStream::new)
            .ok_or(BusError::ReaderTaken(BusChannel::Watcher))
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Snapshot of both conduits.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            ticker_enabled: self.is_ticker_enabled(),
            watcher_enabled: self.is_watcher_enabled(),
            ticker_in_flight: self.ticker.get().map_or(0, Conduit::in_flight),
            watcher_in_flight: self.watcher.get().map_or(0, Conduit::in_flight),
            ticker_capacity: self.config.ticker_capacity,
            watcher_capacity: self.config.watcher_capacity,
        }
    }
}

/// Shared event bus reference.
pub type SharedEventBus = Arc<EventBus>;

/// Statistics about the bus conduits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BusStats {
    /// Whether the ticker conduit is enabled.
    pub ticker_enabled: bool,
    /// Whether the watcher conduit is enabled.
    pub watcher_enabled: bool,
    /// Ticker events buffered and not yet received.
    pub ticker_in_flight: usize,
    /// Watcher events buffered and not yet received.
    pub watcher_in_flight: usize,
    /// Ticker conduit capacity.
    pub ticker_capacity: usize,
    /// Watcher conduit capacity.
    pub watcher_capacity: usize,
}

// =============================================================================
// Tests
// =============================================================================
