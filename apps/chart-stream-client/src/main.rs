//! Chart Stream Client Binary
//!
//! Fetches historical series for the given symbols and prints them as JSON
//! on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! CHART_AMOUNT=500 CHART_TIMEFRAME=1D chart-stream-client NASDAQ:AAPL BINANCE:BTCUSDT
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `TV_SESSION_ID`: Account `sessionid` cookie (default: anonymous)
//! - `TV_WEBSOCKET_URL`, `TV_ORIGIN`, `TV_DISCLAIMER_URL`: Endpoint overrides
//! - `TV_HTTP_TIMEOUT_SECS`: Token request timeout (default: 30)
//! - `CHART_AMOUNT`: Points per symbol (default: one batch)
//! - `CHART_TIMEFRAME`: Interval or `1D` | `1W` | `1M` | `12M` (default: 60)
//! - `CHART_SERIES`: candles | indicators (default: candles)
//! - `CHART_METRICS_PORT`: Prometheus metrics port (default: 0, disabled)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: info)

use anyhow::{Context, anyhow, bail};
use chart_stream_client::infrastructure::telemetry;
use chart_stream_client::{
    ClientConfig, FetchRequest, SeriesSelection, TransportSession, fetch_candles,
    fetch_indicators, init_metrics,
};
use serde::Serialize;
use tokio::signal;

/// One symbol's series in the printed output.
#[derive(Serialize)]
struct SymbolSeries<'a, T> {
    symbol: &'a str,
    points: Vec<T>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let telemetry_guard = telemetry::init();
    tracing::debug!(otlp = telemetry_guard.is_exporting(), "Telemetry initialized");

    let config = ClientConfig::from_env()?;
    log_config(&config);

    init_metrics(config.metrics_port)?;

    let symbols: Vec<String> = std::env::args().skip(1).collect();
    if symbols.is_empty() {
        bail!("usage: chart-stream-client <SYMBOL>...");
    }

    let request = FetchRequest {
        symbols,
        amount: config.fetch.amount,
        timeframe: config.fetch.timeframe,
    };

    let session = TransportSession::connect(&config.connection)
        .await
        .context("connecting to chart socket")?;

    let rendered = tokio::select! {
        result = fetch_rendered(&session, config.fetch.series, &request) => result,
        () = await_shutdown() => Err(anyhow!("interrupted")),
    };

    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "Chart session did not close cleanly");
    }

    println!("{}", rendered?);
    Ok(())
}

/// Fetch the selected series and render it as pretty JSON.
async fn fetch_rendered(
    session: &TransportSession,
    selection: SeriesSelection,
    request: &FetchRequest,
) -> anyhow::Result<String> {
    let json = match selection {
        SeriesSelection::Candles => {
            let series = fetch_candles(session, request).await?;
            serde_json::to_string_pretty(&label(&request.symbols, series))?
        }
        SeriesSelection::Indicators => {
            let series = fetch_indicators(session, request).await?;
            serde_json::to_string_pretty(&label(&request.symbols, series))?
        }
    };
    Ok(json)
}

fn label<T>(symbols: &[String], series: Vec<Vec<T>>) -> Vec<SymbolSeries<'_, T>> {
    symbols
        .iter()
        .zip(series)
        .map(|(symbol, points)| SymbolSeries {
            symbol: symbol.as_str(),
            points,
        })
        .collect()
}

/// Load .env file from current directory or any ancestor directory.
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

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        series = config.fetch.series.as_str(),
        timeframe = %config.fetch.timeframe,
        amount = ?config.fetch.amount,
        authenticated = config.connection.session_id.is_some(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        websocket_url = %config.connection.websocket_url,
        origin = %config.connection.origin,
        "Chart endpoints"
    );
}

/// Wait for SIGINT or SIGTERM.
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for clean shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for clean shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, abandoning fetch"),
        () = terminate => tracing::info!("Received SIGTERM, abandoning fetch"),
    }
}
