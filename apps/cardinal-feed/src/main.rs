//! Cardinal Feed Binary
//!
//! Runs the Binance stream session under a reconnect supervisor and drains
//! the event bus.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin cardinal-feed
//! ```
//!
//! # Environment Variables
//!
//! - `BINANCE_API_KEY`: enables the authenticated (user data) stream
//! - `BINANCE_SYMBOLS`: comma separated symbols (default: btcusdt)
//! - `BINANCE_WS_URL` / `BINANCE_REST_URL`: endpoint overrides
//! - `CARDINAL_STREAMING_ENABLED`: master switch (default: true)
//! - `CARDINAL_HEALTH_PORT`: health and metrics port (default: 8082)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log filter (default: `cardinal_feed=info`)
//!
//! See `FeedConfig::from_env` for the full list.

use std::sync::Arc;
use std::time::Duration;

use cardinal_feed::infrastructure::binance::{BINANCE_EXCHANGE, BinanceListenKeyClient};
use cardinal_feed::infrastructure::bus::{TickerStream, WatcherStream};
use cardinal_feed::infrastructure::health::{HealthServer, HealthServerState};
use cardinal_feed::infrastructure::reconnect::{ReconnectConfig, SessionSupervisor};
use cardinal_feed::infrastructure::telemetry;
use cardinal_feed::infrastructure::websocket::TungsteniteDialer;
use cardinal_feed::{
    EventBus, FeedConfig, ListenKeyManager, StreamSession, TickerPayload, WatcherPayload,
    init_metrics,
};
use tokio::signal;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;
    tracing::info!("Starting Cardinal Feed");

    let _metrics_handle = init_metrics()?;

    let config = FeedConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let bus = Arc::new(EventBus::new(config.bus_config()));
    if config.bus.enable_ticker {
        bus.enable_ticker();
    }
    if config.bus.enable_watcher {
        bus.enable_watcher();
    }

    let stream = config.stream_config();
    let session = Arc::new(StreamSession::new(
        config.session_config(),
        Arc::new(TungsteniteDialer::new(config.streaming.connect_timeout)),
        Arc::new(stream.protocol()),
        listen_key_manager(&config)?,
        Arc::clone(&bus),
    ));

    let mut consumers = Vec::new();
    if let Ok(ticker) = bus.read_ticker() {
        consumers.push(tokio::spawn(consume_ticker(ticker, shutdown_token.clone())));
    }
    if let Ok(watcher) = bus.read_watcher() {
        consumers.push(tokio::spawn(consume_watcher(watcher, shutdown_token.clone())));
    }

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        vec![Arc::clone(&session)],
        Arc::clone(&bus),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let supervisor = SessionSupervisor::new(
        Arc::clone(&session),
        ReconnectConfig::from_settings(&config.reconnect),
        shutdown_token.clone(),
    );
    let supervisor = tokio::spawn(async move {
        if let Err(e) = supervisor.run().await {
            tracing::error!(error = %e, "Session supervisor stopped");
        }
    });

    tracing::info!("Cardinal Feed ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, supervisor).await.is_err() {
        tracing::warn!("Session did not close within the shutdown timeout");
    }
    for consumer in consumers {
        let _ = consumer.await;
    }

    tracing::info!("Cardinal Feed stopped");
    Ok(())
}

/// Build the listen key manager when the authenticated stream is configured.
fn listen_key_manager(
    config: &FeedConfig,
) -> Result<Option<Arc<ListenKeyManager>>, Box<dyn std::error::Error>> {
    let Some(api_key) = config.credentials.api_key() else {
        return Ok(None);
    };
    if !config.streaming.use_authenticated {
        return Ok(None);
    }

    let client = BinanceListenKeyClient::new(config.streaming.rest_url.clone(), api_key)?;
    Ok(Some(Arc::new(ListenKeyManager::new(
        BINANCE_EXCHANGE,
        Arc::new(client),
        config.listen_key_config(),
    ))))
}

/// Drain the ticker channel.
async fn consume_ticker(mut events: TickerStream, shutdown: CancellationToken) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.next() => event,
        };
        let Some(event) = event else { break };

        match event.payload() {
            TickerPayload::Trade(trade) => tracing::debug!(
                exchange = event.exchange_name(),
                symbol = %trade.symbol,
                price = %trade.price,
                quantity = %trade.quantity,
                "trade"
            ),
            TickerPayload::Ticker(ticker) => tracing::trace!(
                exchange = event.exchange_name(),
                symbol = %ticker.symbol,
                bid = %ticker.bid_price,
                ask = %ticker.ask_price,
                "ticker"
            ),
        }
    }
    tracing::info!("Ticker consumer stopped");
}

/// Drain the watcher channel.
async fn consume_watcher(mut events: WatcherStream, shutdown: CancellationToken) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.next() => event,
        };
        let Some(event) = event else { break };

        match event.payload() {
            WatcherPayload::Depth(depth) => tracing::trace!(
                exchange = event.exchange_name(),
                symbol = %depth.symbol,
                final_update_id = depth.final_update_id,
                "depth"
            ),
            WatcherPayload::Account(account) => tracing::info!(
                exchange = event.exchange_name(),
                balances = account.balances.len(),
                "account update"
            ),
            WatcherPayload::Order(order) => tracing::info!(
                exchange = event.exchange_name(),
                symbol = %order.symbol,
                order_id = order.order_id,
                status = %order.status,
                "order update"
            ),
            WatcherPayload::ListenKeyExpired(_) => tracing::warn!(
                exchange = event.exchange_name(),
                "listen key expired"
            ),
        }
    }
    tracing::info!("Watcher consumer stopped");
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        streaming_enabled = config.streaming.enabled,
        authenticated = config.streaming.use_authenticated,
        symbols = ?config.streaming.symbols,
        health_port = config.server.health_port,
        ticker_enabled = config.bus.enable_ticker,
        watcher_enabled = config.bus.enable_watcher,
        "Configuration loaded"
    );
    tracing::debug!(
        ws_url = %config.streaming.ws_url,
        rest_url = %config.streaming.rest_url,
        "Exchange endpoints"
    );
}

/// Load .env from the current directory or the nearest ancestor that has one.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for SIGINT or SIGTERM, then cancel `shutdown_token`.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
