//! Prometheus Metrics Module
//!
//! Exposes feed metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Bus**: events delivered per channel, rejected pushes, backpressure waits
//! - **Listen keys**: acquisitions, renewals and authentication downgrades
//! - **Sessions**: state gauge, frames, decode errors, exits, reconnects
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use serde::Serialize;

use crate::domain::session::{SessionExit, SessionState};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Bus
    describe_counter!(
        "cardinal_feed_bus_events_total",
        "Events delivered to a bus channel by exchange and payload kind"
    );
    describe_counter!(
        "cardinal_feed_bus_rejected_total",
        "Pushes rejected because the channel was never enabled"
    );
    describe_histogram!(
        "cardinal_feed_bus_backpressure_seconds",
        "Time a producer waited for the consumer to take an event"
    );

    // Listen keys
    describe_counter!(
        "cardinal_feed_listen_key_acquisitions_total",
        "Listen key acquisition attempts by outcome"
    );
    describe_counter!(
        "cardinal_feed_listen_key_renewals_total",
        "Listen key keep-alive attempts by outcome"
    );
    describe_counter!(
        "cardinal_feed_auth_downgrades_total",
        "Sessions that fell back to public streams"
    );

    // Sessions
    describe_gauge!(
        "cardinal_feed_session_state",
        "Session state (0=disconnected 1=authenticating 2=connected 3=degraded 4=closed)"
    );
    describe_counter!(
        "cardinal_feed_frames_received_total",
        "Data frames received from exchange streams"
    );
    describe_counter!(
        "cardinal_feed_decode_errors_total",
        "Frames dropped because they could not be decoded"
    );
    describe_counter!(
        "cardinal_feed_session_exits_total",
        "Read loop exits by reason"
    );
    describe_counter!(
        "cardinal_feed_reconnects_total",
        "Session reconnection attempts"
    );
}

// =============================================================================
// Labels
// =============================================================================

/// Bus channel label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BusChannel {
    /// Market data channel.
    Ticker,
    /// Depth, account and order channel.
    Watcher,
}

impl BusChannel {
    /// Lower-case channel name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Watcher => "watcher",
        }
    }
}

impl fmt::Display for BusChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn outcome(success: bool) -> &'static str {
    if success { "success" } else { "failure" }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an event delivered to the bus.
pub fn record_bus_event(channel: BusChannel, exchange: &str, kind: &'static str) {
    counter!(
        "cardinal_feed_bus_events_total",
        "channel" => channel.as_str(),
        "exchange" => exchange.to_string(),
        "kind" => kind
    )
    .increment(1);
}

/// Record a push to a channel that was never enabled.
pub fn record_bus_rejected(channel: BusChannel) {
    counter!(
        "cardinal_feed_bus_rejected_total",
        "channel" => channel.as_str()
    )
    .increment(1);
}

/// Record how long a producer waited for the consumer.
pub fn record_backpressure_wait(channel: BusChannel, waited: Duration) {
    histogram!(
        "cardinal_feed_bus_backpressure_seconds",
        "channel" => channel.as_str()
    )
    .record(waited.as_secs_f64());
}

/// Record a listen key acquisition attempt.
pub fn record_listen_key_acquired(exchange: &str, success: bool) {
    counter!(
        "cardinal_feed_listen_key_acquisitions_total",
        "exchange" => exchange.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);
}

/// Record a listen key keep-alive attempt.
pub fn record_listen_key_renewal(exchange: &str, success: bool) {
    counter!(
        "cardinal_feed_listen_key_renewals_total",
        "exchange" => exchange.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);
}

/// Record a fallback from authenticated to public streams.
pub fn record_auth_downgrade(exchange: &str) {
    counter!(
        "cardinal_feed_auth_downgrades_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}

/// Update the session state gauge.
pub fn set_session_state(exchange: &str, state: SessionState) {
    gauge!(
        "cardinal_feed_session_state",
        "exchange" => exchange.to_string()
    )
    .set(state.as_gauge());
}

/// Record a data frame read from the stream.
pub fn record_frame_received(exchange: &str) {
    counter!(
        "cardinal_feed_frames_received_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error(exchange: &str) {
    counter!(
        "cardinal_feed_decode_errors_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}

/// Record why a read loop stopped.
pub fn record_session_exit(exchange: &str, exit: &SessionExit) {
    counter!(
        "cardinal_feed_session_exits_total",
        "exchange" => exchange.to_string(),
        "reason" => exit.label()
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(exchange: &str) {
    counter!(
        "cardinal_feed_reconnects_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_channel_names() {
        assert_eq!(BusChannel::Ticker.as_str(), "ticker");
        assert_eq!(BusChannel::Watcher.to_string(), "watcher");
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome(true), "success");
        assert_eq!(outcome(false), "failure");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_bus_event(BusChannel::Ticker, "binance", "trade");
        record_session_exit("binance", &SessionExit::Cancelled);
        set_session_state("binance", SessionState::Connected);
    }
}
