//! Listen Key Manager
//!
//! Owns the listen key of one stream session: acquires it from the
//! exchange's REST surface and keeps it alive on a fixed cadence while the
//! session runs.
//!
//! # Lifecycle
//!
//! 1. `acquire()` requests a key and stores it as the session's current key
//! 2. `spawn_keepalive()` renews it every `keepalive_interval`
//! 3. The keep-alive task stops when the session cancels it, when the key is
//!    superseded or invalidated, or when renewals have failed for longer
//!    than the key's `validity` window
//! 4. `release()` invalidates the key locally and on the exchange
//!
//! A failed renewal tick is logged and counted but never fails the session;
//! the session only degrades if the exchange actually drops the connection.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::tasks::TaskCounter;
use crate::application::ports::{AuthError, ListenKeySource};
use crate::domain::listen_key::ListenKey;
use crate::infrastructure::metrics;

/// Shortest keep-alive period; a zero interval is raised to this.
pub const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1);

/// Longest keep-alive period.
pub const MAX_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for listen key renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenKeyConfig {
    /// Interval between keep-alive requests.
    pub keepalive_interval: Duration,
    /// How long a key stays valid after its last successful renewal.
    pub validity: Duration,
}

impl Default for ListenKeyConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30 * 60),
            validity: Duration::from_secs(60 * 60),
        }
    }
}

impl ListenKeyConfig {
    /// Create a new configuration with custom values.
    ///
    /// `keepalive_interval` is clamped to
    /// [`MIN_KEEPALIVE_INTERVAL`]..=[`MAX_KEEPALIVE_INTERVAL`].
    #[must_use]
    pub const fn new(keepalive_interval: Duration, validity: Duration) -> Self {
        Self {
            keepalive_interval: clamp_interval(keepalive_interval),
            validity,
        }
    }
}

const fn clamp_interval(interval: Duration) -> Duration {
    if interval.as_nanos() < MIN_KEEPALIVE_INTERVAL.as_nanos() {
        MIN_KEEPALIVE_INTERVAL
    } else if interval.as_nanos() > MAX_KEEPALIVE_INTERVAL.as_nanos() {
        MAX_KEEPALIVE_INTERVAL
    } else {
        interval
    }
}

#[derive(Debug)]
struct KeySlot {
    key: ListenKey,
    last_renewed: Instant,
}

/// Acquires and renews the listen key of a single stream session.
pub struct ListenKeyManager {
    exchange: String,
    source: Arc<dyn ListenKeySource>,
    config: ListenKeyConfig,
    slot: RwLock<Option<KeySlot>>,
}

impl std::fmt::Debug for ListenKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenKeyManager")
            .field("exchange", &self.exchange)
            .field("config", &self.config)
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

impl ListenKeyManager {
    /// Create a manager for `exchange` backed by `source`.
    #[must_use]
    pub fn new(
        exchange: impl Into<String>,
        source: Arc<dyn ListenKeySource>,
        config: ListenKeyConfig,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            source,
            config,
            slot: RwLock::new(None),
        }
    }

    /// Renewal configuration.
    #[must_use]
    pub const fn config(&self) -> &ListenKeyConfig {
        &self.config
    }

    /// Request a new listen key and make it the current key.
    ///
    /// Any previously held key is superseded, which stops its keep-alive
    /// task at the next tick.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if the exchange cannot be reached, rejects the
    /// request, or answers with an empty key.
    pub async fn acquire(&self) -> Result<ListenKey, AuthError> {
        let result = match self.source.create_listen_key().await {
            Ok(value) if value.trim().is_empty() => Err(AuthError::InvalidResponse(
                "empty listen key".to_string(),
            )),
            other => other,
        };

        match result {
            Ok(value) => {
                let key = ListenKey::new(value);
                *self.slot.write() = Some(KeySlot {
                    key: key.clone(),
                    last_renewed: Instant::now(),
                });
                metrics::record_listen_key_acquired(&self.exchange, true);
                tracing::info!(exchange = %self.exchange, key = %key, "Listen key acquired");
                Ok(key)
            }
            Err(e) => {
                metrics::record_listen_key_acquired(&self.exchange, false);
                tracing::warn!(exchange = %self.exchange, error = %e, "Listen key acquisition failed");
                Err(e)
            }
        }
    }

    /// The current listen key, if one is held.
    #[must_use]
    pub fn current(&self) -> Option<ListenKey> {
        self.slot.read().as_ref().map(|slot| slot.key.clone())
    }

    /// Drop the current key. Returns the key that was held.
    pub fn invalidate(&self) -> Option<ListenKey> {
        let previous = self.slot.write().take().map(|slot| slot.key);
        if let Some(key) = &previous {
            tracing::debug!(exchange = %self.exchange, key = %key, "Listen key invalidated");
        }
        previous
    }

    /// Invalidate the current key and close it on the exchange (best effort).
    pub async fn release(&self) {
        if let Some(key) = self.invalidate()
            && let Err(e) = self.source.close_listen_key(key.value()).await
        {
            tracing::debug!(exchange = %self.exchange, error = %e, "Failed to close listen key");
        }
    }

    /// Spawn the keep-alive task for `key`, tracked by `tasks`.
    ///
    /// The returned handle must be retained by the owning session and the
    /// task stopped through `cancel` before the session is considered closed.
    pub fn spawn_keepalive(
        self: &Arc<Self>,
        key: ListenKey,
        cancel: CancellationToken,
        tasks: &TaskCounter,
    ) -> JoinHandle<()> {
        tasks.spawn(Arc::clone(self).keep_alive(key, cancel))
    }

    /// Renew `key` every `keepalive_interval` until stopped.
    pub async fn keep_alive(self: Arc<Self>, key: ListenKey, cancel: CancellationToken) {
        // Fields are public; a hand-built config may carry a zero period.
        let period = clamp_interval(self.config.keepalive_interval);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(
            exchange = %self.exchange,
            interval_secs = period.as_secs(),
            "Listen key keep-alive started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(exchange = %self.exchange, "Listen key keep-alive cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let keep_going = tokio::select! {
                        () = cancel.cancelled() => false,
                        keep_going = self.renew(&key) => keep_going,
                    };
                    if !keep_going {
                        break;
                    }
                }
            }
        }
    }

    /// Run one renewal. Returns whether the keep-alive loop should continue.
    async fn renew(&self, key: &ListenKey) -> bool {
        if !self.is_current(key) {
            tracing::debug!(exchange = %self.exchange, key = %key, "Listen key superseded");
            return false;
        }

        match self.source.keep_alive_listen_key(key.value()).await {
            Ok(()) => {
                if let Some(slot) = self.slot.write().as_mut()
                    && slot.key == *key
                {
                    slot.last_renewed = Instant::now();
                }
                metrics::record_listen_key_renewal(&self.exchange, true);
                tracing::debug!(exchange = %self.exchange, "Listen key renewed");
                true
            }
            Err(e) => {
                metrics::record_listen_key_renewal(&self.exchange, false);
                let stale_for = self.time_since_renewal(key);
                if stale_for > self.config.validity {
                    tracing::error!(
                        exchange = %self.exchange,
                        error = %e,
                        stale_secs = stale_for.as_secs(),
                        "Listen key expired after failed renewals"
                    );
                    self.invalidate_if_current(key);
                    return false;
                }
                tracing::warn!(exchange = %self.exchange, error = %e, "Listen key renewal failed");
                true
            }
        }
    }

    fn is_current(&self, key: &ListenKey) -> bool {
        self.slot
            .read()
            .as_ref()
            .is_some_and(|slot| slot.key == *key)
    }

    fn time_since_renewal(&self, key: &ListenKey) -> Duration {
        self.slot
            .read()
            .as_ref()
            .filter(|slot| slot.key == *key)
            .map_or(Duration::MAX, |slot| slot.last_renewed.elapsed())
    }

    fn invalidate_if_current(&self, key: &ListenKey) {
        let mut slot = self.slot.write();
        if slot.as_ref().is_some_and(|s| s.key == *key) {
            *slot = None;
        }
    }
}
