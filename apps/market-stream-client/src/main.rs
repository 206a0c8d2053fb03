//! Market Stream Client Binary
//!
//! Connects to a market data feed, keeps the configured subscriptions
//! alive and logs every client event.
//!
//! # Usage
//!
//! ```bash
//! STREAM_PROFILE=trading STREAM_SYMBOLS=EURUSD,BTCUSD:trades cargo run --bin market-stream-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `STREAM_URL`: Feed endpoint, unless `STREAM_PROFILE` supplies one
//!
//! ## Optional
//! - `STREAM_PROFILE`: trading | news | economic
//! - `STREAM_API_KEY`: API key passed as a URL parameter
//! - `STREAM_BINARY`: Request binary framing (default: profile or false)
//! - `STREAM_SYMBOLS`: Comma-separated `SYMBOL[:channel]` list
//! - `STREAM_STORE_PATH`: Subscription state file (default: subscriptions.json)
//! - `STREAM_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use market_stream_client::infrastructure::health::{HealthServer, HealthServerState};
use market_stream_client::infrastructure::telemetry;
use market_stream_client::{
    ClientConfig, JsonFileStore, StreamClient, StreamEvent, StreamSettings, WebSocketTransport,
    init_metrics,
};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (tracing + optional OTLP export)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Stream Client");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed, /metrics disabled");
    }

    let settings = StreamSettings::from_env().context("invalid configuration")?;
    log_config(&settings);

    let shutdown_token = CancellationToken::new();

    let store = Arc::new(JsonFileStore::new(settings.store_path.clone()));
    let client = StreamClient::with_store(
        ClientConfig::from_settings(&settings),
        Arc::new(WebSocketTransport::new()),
        store,
    );

    match client.restore_subscriptions() {
        Ok(restored) => tracing::info!(restored, "Loaded saved subscriptions"),
        Err(e) => tracing::warn!(error = %e, "Could not load saved subscriptions"),
    }
    for request in &settings.subscriptions {
        client.subscribe(request.symbol.clone(), request.channel.clone());
    }

    // Spawn event logger
    let events = client.events();
    let logger_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        log_events(events, logger_shutdown).await;
    });

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        client.clone(),
    ));
    let health_server = HealthServer::new(
        settings.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    match client.connect().await {
        Ok(()) => tracing::info!("Stream client ready"),
        Err(e) if e.is_fatal() => {
            shutdown_token.cancel();
            return Err(e).context("cannot connect to feed");
        }
        Err(e) => tracing::warn!(error = %e, "Initial connection failed, retrying in background"),
    }

    await_shutdown(shutdown_token).await;

    client.disconnect();
    tracing::info!(stats = ?client.stats(), "Stream client stopped");
    Ok(())
}

/// Log client events until shutdown.
async fn log_events(
    mut events: tokio::sync::broadcast::Receiver<StreamEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(StreamEvent::MarketData(data)) => {
                tracing::debug!(
                    kind = data.kind.as_str(),
                    symbol = %data.symbol,
                    price = ?data.price,
                    "Market data"
                );
            }
            Ok(StreamEvent::StatsUpdated(stats)) => {
                tracing::trace!(
                    sent = stats.messages_sent,
                    received = stats.messages_received,
                    errors = stats.errors,
                    "Stats updated"
                );
            }
            Ok(event) => tracing::info!(?event, "Client event"),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(settings: &StreamSettings) {
    tracing::info!(
        profile = settings.profile.map(|p| p.as_str()),
        binary = settings.binary,
        protocol_version = %settings.protocol_version,
        subscriptions = settings.subscriptions.len(),
        health_port = settings.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        url = %settings.url,
        api_key = ?settings.api_key,
        store_path = %settings.store_path.display(),
        "Feed endpoint"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
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
}
