//! Session Supervisor Integration Tests
//!
//! Tests reconnection after a dropped connection, giving up after the
//! configured attempts, and shutdown through the cancellation token.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use cardinal_feed::SessionState;
use cardinal_feed::infrastructure::reconnect::{
    ReconnectConfig, ReconnectError, SessionSupervisor,
};

use common::{CountingSource, Harness, ScriptedConnection, config, eventually, within};

fn fast_backoff(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        multiplier: 2.0,
        jitter_factor: 0.0,
        max_attempts,
    }
}

#[tokio::test]
async fn redials_after_connection_loss() {
    let h = Harness::authenticated(config(), CountingSource::default());
    let (first, first_remote) = ScriptedConnection::new();
    let (second, _second_remote) = ScriptedConnection::new();
    h.dialer.push(first);
    h.dialer.push(second);

    let cancel = CancellationToken::new();
    let supervisor = SessionSupervisor::new(
        std::sync::Arc::clone(&h.session),
        fast_backoff(0),
        cancel.clone(),
    );
    let handle = tokio::spawn(supervisor.run());

    eventually(|| h.session.state() == SessionState::Connected).await;
    drop(first_remote);

    eventually(|| h.dialer.dial_count() == 2 && h.session.state() == SessionState::Connected)
        .await;
    // Each connection gets its own listen key.
    assert_eq!(h.source.created(), 2);

    cancel.cancel();
    let result = within(handle).await.unwrap();

    assert!(result.is_ok());
    assert_eq!(h.session.state(), SessionState::Closed);
    assert_eq!(h.session.active_tasks(), 0);
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let h = Harness::public(config());
    for _ in 0..3 {
        h.dialer.push_failure("connection refused");
    }

    let supervisor = SessionSupervisor::new(
        std::sync::Arc::clone(&h.session),
        fast_backoff(2),
        CancellationToken::new(),
    );
    let result = within(supervisor.run()).await;

    assert!(matches!(result, Err(ReconnectError::MaxAttemptsExceeded(2))));
    assert_eq!(h.dialer.dial_count(), 3);
    assert_eq!(h.session.active_tasks(), 0);
}

#[tokio::test]
async fn disabled_session_is_not_supervised() {
    let h = Harness::public(config().with_enabled(false));

    let supervisor = SessionSupervisor::new(
        std::sync::Arc::clone(&h.session),
        fast_backoff(0),
        CancellationToken::new(),
    );
    let result = within(supervisor.run()).await;

    assert!(matches!(result, Err(ReconnectError::NotEnabled(ref name)) if name == "binance"));
    assert_eq!(h.dialer.dial_count(), 0);
}

#[tokio::test]
async fn cancelled_before_start_does_not_dial() {
    let h = Harness::public(config());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let supervisor = SessionSupervisor::new(
        std::sync::Arc::clone(&h.session),
        fast_backoff(0),
        cancel,
    );
    within(supervisor.run()).await.unwrap();

    assert_eq!(h.dialer.dial_count(), 0);
    assert_eq!(h.session.state(), SessionState::Closed);
}
