#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Cardinal Feed - Exchange Stream Fan-In
//!
//! Maintains one streaming session per exchange and fans every decoded
//! frame into a single consumer pipeline through a bounded event bus with
//! two typed channels.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: payload kinds, bus events, session states, listen keys
//!
//! - **Application**: ports and services
//!   - `ports`: listen key source, stream dialer/connection, protocol decoder
//!   - `services`: listen key manager, stream session state machine
//!
//! - **Infrastructure**: adapters and process plumbing
//!   - `bus`: the ticker and watcher conduits
//!   - `binance`: decoder, stream layout and listen key REST client
//!   - `websocket`: `tokio-tungstenite` transport
//!   - `reconnect`: backoff policy and session supervisor
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────────┐   ticker   ┌──────────┐
//! exchange WS ──────►│ StreamSession├──────────►│          │
//!   (frames)         │  read loop   ├──────────►│ EventBus ├──► consumer
//!                    └──────┬───────┘  watcher   │          │
//!                           │                    └──────────┘
//!                  ListenKeyManager ◄── keep-alive ── REST
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - payloads and state types with no I/O.
pub mod domain;

/// Application layer - ports and services.
pub mod application;

/// Infrastructure layer - adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::events::{TickerEvent, WatcherEvent};
pub use domain::listen_key::ListenKey;
pub use domain::market::{DecodedFrame, TickerPayload, WatcherPayload};
pub use domain::session::{SessionExit, SessionState};

// Services
pub use application::services::{
    ListenKeyConfig, ListenKeyManager, SessionConfig, SessionError, StreamSession,
};

// Event bus
pub use infrastructure::bus::{BusConfig, BusError, BusStats, EventBus, SharedEventBus};

// Config
pub use infrastructure::config::{ConfigError, FeedConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
