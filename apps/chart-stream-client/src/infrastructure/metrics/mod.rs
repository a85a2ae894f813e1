//! Prometheus Metrics Module
//!
//! Counters and timings for the chart transport and series fetches.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames by kind, malformed frames, keepalive echoes
//! - **Commands**: Outbound commands by name
//! - **Session**: Open sessions and connect failures
//! - **Series**: Points delivered, skipped updates and points, failed symbols, fetch latency
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// =============================================================================
// Exporter
// =============================================================================

static LISTEN_ADDR: OnceLock<SocketAddr> = OnceLock::new();

/// Metrics setup errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The Prometheus exporter could not be installed.
    #[error("failed to install Prometheus exporter: {0}")]
    Install(#[from] BuildError),

    /// An exporter is already listening.
    #[error("metrics exporter already listening on {0}")]
    AlreadyInstalled(SocketAddr),
}

/// Serve Prometheus metrics at `/metrics` on `port`.
///
/// Port 0 leaves metrics disabled. Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed or one is already running.
pub fn init_metrics(port: u16) -> Result<Option<SocketAddr>, MetricsError> {
    if port == 0 {
        return Ok(None);
    }
    if let Some(addr) = LISTEN_ADDR.get() {
        return Err(MetricsError::AlreadyInstalled(*addr));
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    let _ = LISTEN_ADDR.set(addr);

    register_metrics();
    tracing::info!(%addr, "Metrics exporter listening");
    Ok(Some(addr))
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "chart_client_frames_received_total",
        "Frames decoded from the chart socket by kind"
    );
    describe_counter!(
        "chart_client_malformed_frames_total",
        "Frames that failed to decode"
    );
    describe_counter!(
        "chart_client_keepalives_echoed_total",
        "Keepalive frames echoed back to the server"
    );
    describe_counter!(
        "chart_client_commands_sent_total",
        "Commands queued for the chart socket by name"
    );
    describe_counter!(
        "chart_client_events_dispatched_total",
        "Events delivered to subscribers"
    );

    describe_gauge!(
        "chart_client_open_sessions",
        "Number of open transport sessions"
    );
    describe_counter!(
        "chart_client_connect_failures_total",
        "Failed connects by stage"
    );

    describe_counter!(
        "chart_client_series_points_total",
        "Series points returned by fetches"
    );
    describe_counter!(
        "chart_client_series_skipped_updates_total",
        "Series updates without a readable page"
    );
    describe_counter!(
        "chart_client_series_skipped_points_total",
        "Series points that could not be read or converted"
    );
    describe_counter!(
        "chart_client_symbol_errors_total",
        "Symbols the server could not resolve"
    );
    describe_histogram!(
        "chart_client_fetch_duration_seconds",
        "Wall time of a multi-symbol fetch"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Stage at which a connect attempt failed.
#[derive(Debug, Clone, Copy)]
pub enum ConnectStage {
    /// Token exchange.
    Auth,
    /// WebSocket upgrade.
    Upgrade,
    /// Waiting for the session handshake.
    Handshake,
}

impl ConnectStage {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Upgrade => "upgrade",
            Self::Handshake => "handshake",
        }
    }
}

/// Record one decoded frame.
pub fn record_frame(kind: &'static str) {
    counter!("chart_client_frames_received_total", "kind" => kind).increment(1);
}

/// Record one frame that failed to decode.
pub fn record_malformed_frame() {
    counter!("chart_client_malformed_frames_total").increment(1);
}

/// Record one keepalive echo.
pub fn record_keepalive_echo() {
    counter!("chart_client_keepalives_echoed_total").increment(1);
}

/// Record one queued command.
pub fn record_command_sent(name: &str) {
    counter!("chart_client_commands_sent_total", "command" => name.to_string()).increment(1);
}

/// Record an event delivered to `subscribers` subscribers.
pub fn record_event_dispatched(subscribers: usize) {
    if subscribers > 0 {
        counter!("chart_client_events_dispatched_total").increment(1);
    }
}

/// Track a session opening (`+1.0`) or closing (`-1.0`).
pub fn adjust_open_sessions(delta: f64) {
    gauge!("chart_client_open_sessions").increment(delta);
}

/// Record a failed connect.
pub fn record_connect_failure(stage: ConnectStage) {
    counter!("chart_client_connect_failures_total", "stage" => stage.as_str()).increment(1);
}

/// Record points returned for one symbol.
pub fn record_series_points(series: &'static str, count: usize) {
    counter!("chart_client_series_points_total", "series" => series)
        .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record an update whose page could not be read.
pub fn record_skipped_update(series: &'static str) {
    counter!("chart_client_series_skipped_updates_total", "series" => series).increment(1);
}

/// Record points dropped from a page or a completed series.
pub fn record_skipped_points(series: &'static str, count: usize) {
    counter!("chart_client_series_skipped_points_total", "series" => series)
        .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record a symbol the server failed to resolve.
pub fn record_symbol_error(series: &'static str) {
    counter!("chart_client_symbol_errors_total", "series" => series).increment(1);
}

/// Record the duration of one fetch.
pub fn record_fetch_duration(series: &'static str, duration: Duration) {
    histogram!("chart_client_fetch_duration_seconds", "series" => series)
        .record(duration.as_secs_f64());
}
