#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Chart Stream Client - Historical Series over the Chart Socket
//!
//! Client for the length-prefixed chart WebSocket protocol: authenticates a
//! socket session, echoes server keepalives, fans events out to subscribers,
//! and fetches historical candles or indicator series for symbol lists.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: Series points, candles, timeframes, page accumulation
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: The session port the workflows drive
//!   - `services`: Generic series fetch workflow (candles, indicators)
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `protocol`: Frame codec, command builders, token exchange, transport session
//!   - `broadcast`: Subscriber registry for event fan-out
//!   - `config`: Environment configuration
//!   - `metrics`, `telemetry`: Prometheus counters and tracing setup
//!
//! # Data Flow
//!
//! ```text
//!                  +-------------+  events   +------------+   +---------------+
//! chart socket --->| reader task |---------->| subscriber |-->| series fetch  |
//!      ^           +-------------+           |  registry  |   |   workflow    |
//!      |             | keepalive echo        +------------+   +---------------+
//!      |             v                                                |
//!      |           +-------------+        commands                    |
//!      +-----------| writer task |<-----------------------------------+
//!                  +-------------+
//! ```
//!
//! # Example
//!
//! ```no_run
//! use chart_stream_client::{ConnectionSettings, FetchRequest, TransportSession, fetch_candles};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let session = TransportSession::connect(&ConnectionSettings::default()).await?;
//! let request = FetchRequest::new(["NASDAQ:AAPL"]).with_amount(100);
//! let candles = fetch_candles(&session, &request).await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Series types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::series::{
    Candle, ChartSessionId, IndicatorPoint, MAX_BATCH_SIZE, RawSeriesPoint, SeriesError,
    Timeframe,
};

// Fetch workflows
pub use application::ports::SessionPort;
pub use application::services::{
    Candles, FetchError, FetchOutcome, FetchRequest, Indicators, SeriesKind, fetch_candles,
    fetch_candles_with_session, fetch_indicators, fetch_series, fetch_series_with_session,
};

// Transport
pub use infrastructure::broadcast::{SubscriberRegistry, Subscription, Unsubscriber};
pub use infrastructure::protocol::{
    Command, Event, Frame, FrameCodec, SessionCookie, SessionError, SessionState,
    TransportSession,
};

// Infrastructure config
pub use infrastructure::config::{
    ClientConfig, ConfigError, ConnectionSettings, FetchSettings, SeriesSelection,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
