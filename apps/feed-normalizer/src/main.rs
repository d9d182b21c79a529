//! Feed Normalizer Binary
//!
//! Streams normalized trades and order book changes for one exchange and
//! writes each event as a JSON line through `tracing`.
//!
//! # Usage
//!
//! ```bash
//! FEED_SYMBOLS=ETH-USD,BTC-USD cargo run --bin feed-normalizer
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `FEED_SYMBOLS`: Comma separated market symbols
//!
//! ## Optional
//! - `FEED_EXCHANGE`: Exchange id (default: bittrex)
//! - `FEED_BOOK_DEPTH`: Order book depth (default: 25)
//! - `FEED_BOOK_POLLING`: Poll REST snapshots instead of socket deltas (default: false)
//! - `FEED_METRICS_PORT`: Prometheus metrics port, 0 disables the listener (default: 0)
//! - `FEED_HEARTBEAT_INTERVAL_SECS`, `FEED_HEARTBEAT_TIMEOUT_SECS`
//! - `FEED_RECONNECT_DELAY_INITIAL_MS`, `FEED_RECONNECT_DELAY_MAX_SECS`
//! - `FEED_SNAPSHOT_BATCH_SIZE`, `FEED_SNAPSHOT_TIMEOUT_MS`, `FEED_POLLING_INTERVAL_SECS`
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `LOG_FORMAT`: `text` or `json` (default: text)
//! - `RUST_LOG`: Log level (default: info)

use anyhow::Context;
use feed_normalizer::infrastructure::telemetry;
use feed_normalizer::{
    ExchangeOptions, FeedRuntime, NormalizerConfig, StreamConfig, default_registry, init_metrics,
    normalize_book_changes, normalize_trades, stream_normalized,
};
use futures::StreamExt;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting feed normalizer");

    let config = NormalizerConfig::from_env()?;
    log_config(&config);

    let _metrics_handle =
        init_metrics(config.metrics_port).context("failed to initialize metrics")?;

    let options = ExchangeOptions {
        depth: Some(config.book_depth),
        polling_interval: config
            .book_polling
            .then_some(config.feed.snapshot.polling_interval),
        ..ExchangeOptions::default()
    };
    let stream_config =
        StreamConfig::new(config.exchange.clone(), config.symbols.clone()).with_options(options);

    let runtime = FeedRuntime::production(config.feed.clone())?;
    let registry = default_registry();

    let mut stream = stream_normalized(
        &registry,
        &runtime,
        &stream_config,
        &[normalize_trades, normalize_book_changes],
    )?;

    tracing::info!("Feed normalizer ready");

    let shutdown = await_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            event = stream.next() => {
                let Some(event) = event else {
                    tracing::warn!("Normalized stream ended");
                    break;
                };
                match serde_json::to_string(&event) {
                    Ok(line) => tracing::info!(target: "feed_normalizer::events", event = %line),
                    Err(e) => tracing::error!(error = %e, "Failed to serialize event"),
                }
            }
        }
    }

    stream.close().await;

    tracing::info!("Feed normalizer stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &NormalizerConfig) {
    tracing::info!(
        exchange = %config.exchange,
        symbols = ?config.symbols,
        book_depth = config.book_depth,
        book_polling = config.book_polling,
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_interval_ms = config.feed.websocket.heartbeat_interval.as_millis(),
        heartbeat_timeout_ms = config.feed.websocket.heartbeat_timeout.as_millis(),
        snapshot_batch_size = config.feed.snapshot.batch_size,
        "Feed settings"
    );
}

/// Load a .env file from the current directory or the nearest ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

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

/// Resolve on Ctrl+C or SIGTERM.
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
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
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, initiating shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, initiating shutdown"),
    }
}
