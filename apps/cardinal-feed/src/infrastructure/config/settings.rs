//! Feed Configuration Settings
//!
//! Configuration types for the feed, loaded from environment variables.
//! Unparseable values fall back to their defaults. Timer values outside
//! their accepted range are rejected.

use std::time::Duration;

use crate::application::services::listen_key::ListenKeyConfig;
use crate::application::services::session::{
    DEFAULT_LIVENESS_TIMEOUT, DEFAULT_PONG_DELAY, DEFAULT_STREAM_DELIMITER, SessionConfig,
};
use crate::infrastructure::binance::{BINANCE_EXCHANGE, BinanceStreamConfig};
use crate::infrastructure::bus::BusConfig;

/// Default Binance combined-stream endpoint.
pub const DEFAULT_BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/stream";

/// Default Binance REST endpoint.
pub const DEFAULT_BINANCE_REST_URL: &str = "https://api.binance.com";

/// Upper bound for the liveness timeout and listen key timers, in seconds.
pub const MAX_TIMER_SECS: u64 = 24 * 60 * 60;

/// Exchange API credentials.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    api_key: Option<String>,
}

impl Credentials {
    /// Credentials with an API key.
    #[must_use]
    pub const fn new(api_key: String) -> Self {
        Self {
            api_key: Some(api_key),
        }
    }

    /// API key, if configured.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Whether an API key is configured.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.api_key.is_some()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = if self.api_key.is_some() {
            "[REDACTED]"
        } else {
            "<unset>"
        };
        f.debug_struct("Credentials").field("api_key", &key).finish()
    }
}

/// Stream connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingSettings {
    /// Whether streaming is enabled at all.
    pub enabled: bool,
    /// Combined-stream WebSocket endpoint.
    pub ws_url: String,
    /// REST endpoint for listen keys.
    pub rest_url: String,
    /// Lower-case symbols to stream.
    pub symbols: Vec<String>,
    /// Whether to use the authenticated stream.
    pub use_authenticated: bool,
    /// Delimiter preceding the stream list.
    pub stream_delimiter: String,
    /// Budget for answering a peer ping.
    pub pong_delay: Duration,
    /// Peer silence limit (`None` disables the watchdog).
    pub liveness_timeout: Option<Duration>,
    /// Dial timeout.
    pub connect_timeout: Duration,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ws_url: DEFAULT_BINANCE_WS_URL.to_string(),
            rest_url: DEFAULT_BINANCE_REST_URL.to_string(),
            symbols: vec!["btcusdt".to_string()],
            use_authenticated: false,
            stream_delimiter: DEFAULT_STREAM_DELIMITER.to_string(),
            pong_delay: DEFAULT_PONG_DELAY,
            liveness_timeout: Some(DEFAULT_LIVENESS_TIMEOUT),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Listen key timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenKeySettings {
    /// Interval between keep-alive calls.
    pub keepalive_interval: Duration,
    /// How long a key stays valid after its last renewal.
    pub validity: Duration,
}

impl Default for ListenKeySettings {
    fn default() -> Self {
        let defaults = ListenKeyConfig::default();
        Self {
            keepalive_interval: defaults.keepalive_interval,
            validity: defaults.validity,
        }
    }
}

/// Event bus settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusSettings {
    /// Ticker conduit capacity.
    pub ticker_capacity: usize,
    /// Watcher conduit capacity.
    pub watcher_capacity: usize,
    /// Whether the ticker channel is enabled at startup.
    pub enable_ticker: bool,
    /// Whether the watcher channel is enabled at startup.
    pub enable_watcher: bool,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            ticker_capacity: 1,
            watcher_capacity: 1,
            enable_ticker: true,
            enable_watcher: true,
        }
    }
}

/// Reconnection backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Jitter fraction.
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Complete feed configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    /// API credentials.
    pub credentials: Credentials,
    /// Stream settings.
    pub streaming: StreamingSettings,
    /// Listen key timing.
    pub listen_key: ListenKeySettings,
    /// Event bus settings.
    pub bus: BusSettings,
    /// Reconnection settings.
    pub reconnect: ReconnectSettings,
    /// Server settings.
    pub server: ServerSettings,
}

impl FeedConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a set variable is empty where a value is
    /// required, or if the authenticated stream is requested without an
    /// API key.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let credentials = match env.string("BINANCE_API_KEY") {
            Some(key) if key.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("BINANCE_API_KEY".to_string()));
            }
            Some(key) => Credentials::new(key.trim().to_string()),
            None => Credentials::default(),
        };

        let defaults = StreamingSettings::default();
        let symbols = match env.string("BINANCE_SYMBOLS") {
            Some(raw) => {
                let symbols = parse_symbols(&raw);
                if symbols.is_empty() {
                    return Err(ConfigError::EmptyValue("BINANCE_SYMBOLS".to_string()));
                }
                symbols
            }
            None => defaults.symbols,
        };

        let use_authenticated = env.bool("CARDINAL_USE_AUTHENTICATED", credentials.is_present());
        if use_authenticated && !credentials.is_present() {
            return Err(ConfigError::MissingEnvVar("BINANCE_API_KEY".to_string()));
        }

        let streaming = StreamingSettings {
            enabled: env.bool("CARDINAL_STREAMING_ENABLED", defaults.enabled),
            ws_url: env.non_empty("BINANCE_WS_URL").unwrap_or(defaults.ws_url),
            rest_url: env
                .non_empty("BINANCE_REST_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.rest_url),
            symbols,
            use_authenticated,
            stream_delimiter: env
                .non_empty("CARDINAL_STREAM_DELIMITER")
                .unwrap_or(defaults.stream_delimiter),
            pong_delay: env.millis("CARDINAL_PONG_DELAY_MS", defaults.pong_delay),
            liveness_timeout: env
                .liveness_timeout("CARDINAL_LIVENESS_TIMEOUT_SECS", defaults.liveness_timeout)?,
            connect_timeout: env.secs("CARDINAL_CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
        };

        let key_defaults = ListenKeySettings::default();
        let listen_key = ListenKeySettings {
            keepalive_interval: env.bounded_secs(
                "CARDINAL_LISTEN_KEY_KEEPALIVE_SECS",
                key_defaults.keepalive_interval,
            )?,
            validity: env
                .bounded_secs("CARDINAL_LISTEN_KEY_VALIDITY_SECS", key_defaults.validity)?,
        };

        let bus_defaults = BusSettings::default();
        let bus = BusSettings {
            ticker_capacity: env
                .parsed("CARDINAL_TICKER_CAPACITY")
                .unwrap_or(bus_defaults.ticker_capacity),
            watcher_capacity: env
                .parsed("CARDINAL_WATCHER_CAPACITY")
                .unwrap_or(bus_defaults.watcher_capacity),
            enable_ticker: env.bool("CARDINAL_ENABLE_TICKER", bus_defaults.enable_ticker),
            enable_watcher: env.bool("CARDINAL_ENABLE_WATCHER", bus_defaults.enable_watcher),
        };

        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            initial_delay: env.millis(
                "CARDINAL_RECONNECT_DELAY_INITIAL_MS",
                reconnect_defaults.initial_delay,
            ),
            max_delay: env.secs(
                "CARDINAL_RECONNECT_DELAY_MAX_SECS",
                reconnect_defaults.max_delay,
            ),
            multiplier: env
                .parsed::<f64>("CARDINAL_RECONNECT_DELAY_MULTIPLIER")
                .filter(|m| m.is_finite() && *m >= 1.0)
                .unwrap_or(reconnect_defaults.multiplier),
            jitter_factor: env
                .parsed::<f64>("CARDINAL_RECONNECT_JITTER")
                .filter(|j| j.is_finite())
                .map_or(reconnect_defaults.jitter_factor, |j| j.clamp(0.0, 1.0)),
            max_attempts: env
                .parsed("CARDINAL_RECONNECT_MAX_ATTEMPTS")
                .unwrap_or(reconnect_defaults.max_attempts),
        };

        let server = ServerSettings {
            health_port: env
                .parsed("CARDINAL_HEALTH_PORT")
                .unwrap_or(ServerSettings::default().health_port),
        };

        Ok(Self {
            credentials,
            streaming,
            listen_key,
            bus,
            reconnect,
            server,
        })
    }

    /// Binance stream layout for the configured symbols.
    #[must_use]
    pub fn stream_config(&self) -> BinanceStreamConfig {
        BinanceStreamConfig::new(self.streaming.ws_url.clone(), self.streaming.symbols.clone())
            .with_delimiter(self.streaming.stream_delimiter.clone())
    }

    /// Session configuration for the Binance stream.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(BINANCE_EXCHANGE, self.stream_config().url())
            .with_enabled(self.streaming.enabled)
            .with_authenticated(self.streaming.use_authenticated)
            .with_stream_delimiter(self.streaming.stream_delimiter.clone())
            .with_pong_delay(self.streaming.pong_delay)
            .with_liveness_timeout(self.streaming.liveness_timeout)
    }

    /// Listen key manager configuration.
    #[must_use]
    pub const fn listen_key_config(&self) -> ListenKeyConfig {
        ListenKeyConfig::new(self.listen_key.keepalive_interval, self.listen_key.validity)
    }

    /// Event bus configuration.
    #[must_use]
    pub fn bus_config(&self) -> BusConfig {
        BusConfig::new(self.bus.ticker_capacity, self.bus.watcher_capacity)
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable is set to an unusable value.
    #[error("invalid value for {var}: {reason}")]
    InvalidValue {
        /// Variable name.
        var: String,
        /// What is wrong with the value.
        reason: String,
    },
}

fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        self.string(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.string(key).and_then(|v| v.trim().parse().ok())
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        match self.non_empty(key).map(|v| v.to_lowercase()).as_deref() {
            Some("1" | "true" | "yes" | "on") => true,
            Some("0" | "false" | "no" | "off") => false,
            _ => default,
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.parsed::<u64>(key).map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.parsed::<u64>(key).map_or(default, Duration::from_millis)
    }

    /// Seconds in `1..=MAX_TIMER_SECS`.
    fn bounded_secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.parsed::<u64>(key) {
            None => Ok(default),
            Some(0) => Err(invalid(key, "must be greater than zero")),
            Some(secs) if secs > MAX_TIMER_SECS => Err(out_of_range(key)),
            Some(secs) => Ok(Duration::from_secs(secs)),
        }
    }

    /// Seconds in `0..=MAX_TIMER_SECS`, where zero disables the timer.
    fn liveness_timeout(
        &self,
        key: &str,
        default: Option<Duration>,
    ) -> Result<Option<Duration>, ConfigError> {
        match self.parsed::<u64>(key) {
            None => Ok(default),
            Some(0) => Ok(None),
            Some(secs) if secs > MAX_TIMER_SECS => Err(out_of_range(key)),
            Some(secs) => Ok(Some(Duration::from_secs(secs))),
        }
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var: key.to_string(),
        reason: reason.to_string(),
    }
}

fn out_of_range(key: &str) -> ConfigError {
    invalid(key, &format!("must not exceed {MAX_TIMER_SECS} seconds"))
}
