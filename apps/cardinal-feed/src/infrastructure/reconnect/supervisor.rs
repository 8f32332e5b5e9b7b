//! Session Supervisor
//!
//! Keeps a [`StreamSession`] connected: whenever the session closes on its
//! own (or a connect attempt fails) it waits out the backoff delay and calls
//! `connect` again. The session itself never reconnects.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::policy::{ReconnectConfig, ReconnectPolicy};
use crate::application::services::{SessionError, StreamSession};
use crate::domain::session::SessionExit;
use crate::infrastructure::metrics;

/// Why a supervisor stopped.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    /// Streaming is disabled for the exchange; nothing to supervise.
    #[error("streaming is not enabled for {0}")]
    NotEnabled(String),

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
}

/// Reconnect loop around one session.
#[derive(Debug)]
pub struct SessionSupervisor {
    session: Arc<StreamSession>,
    config: ReconnectConfig,
    cancel: CancellationToken,
}

impl SessionSupervisor {
    /// Create a supervisor; nothing happens until [`Self::run`].
    #[must_use]
    pub const fn new(
        session: Arc<StreamSession>,
        config: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            config,
            cancel,
        }
    }

    /// Run until cancelled, the session is closed by someone else, or
    /// attempts run out. The session is closed on the way out.
    ///
    /// # Errors
    ///
    /// Returns `NotEnabled` if streaming is disabled and
    /// `MaxAttemptsExceeded` when the policy gives up.
    pub async fn run(self) -> Result<(), ReconnectError> {
        let exchange = self.session.exchange_name().to_string();
        let mut policy = ReconnectPolicy::new(self.config.clone());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.session.connect().await {
                Ok(()) => {
                    policy.reset();
                    let exit = tokio::select! {
                        () = self.cancel.cancelled() => break,
                        exit = self.session.wait_closed() => exit,
                    };
                    match exit {
                        Some(SessionExit::Cancelled) | None => {
                            tracing::info!(exchange = %exchange, "Session closed by owner; supervisor stopping");
                            return Ok(());
                        }
                        Some(exit) => {
                            tracing::warn!(exchange = %exchange, exit = %exit, "Session dropped");
                        }
                    }
                }
                Err(SessionError::NotEnabled(name)) => {
                    return Err(ReconnectError::NotEnabled(name));
                }
                Err(e) => {
                    tracing::warn!(exchange = %exchange, error = %e, "Session connect failed");
                }
            }

            let Some(delay) = policy.next_delay() else {
                self.session.close().await;
                return Err(ReconnectError::MaxAttemptsExceeded(policy.attempt_count()));
            };
            metrics::record_reconnect(&exchange);
            tracing::info!(
                exchange = %exchange,
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting stream session"
            );

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(exchange = %exchange, "Supervisor cancelled");
        self.session.close().await;
        Ok(())
    }
}
