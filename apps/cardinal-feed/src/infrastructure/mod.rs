//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the process-level
//! plumbing (configuration, telemetry, health).

/// Exchange event bus.
pub mod bus;

/// Binance stream decoder, stream layout and listen key REST client.
pub mod binance;

/// WebSocket transport.
pub mod websocket;

/// Reconnection policy and session supervisor.
pub mod reconnect;

/// Environment configuration.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
