//! Configuration Module
//!
//! Environment-driven configuration for the feed.

mod settings;

pub use settings::{
    BusSettings, ConfigError, Credentials, DEFAULT_BINANCE_REST_URL, DEFAULT_BINANCE_WS_URL,
    FeedConfig, ListenKeySettings, ReconnectSettings, ServerSettings, StreamingSettings,
};
