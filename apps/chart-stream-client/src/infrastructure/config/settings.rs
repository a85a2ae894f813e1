//! Client Configuration Settings
//!
//! Configuration types for the chart client, loaded from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `TV_SESSION_ID` | unset (anonymous) |
//! | `TV_WEBSOCKET_URL` | `wss://prodata.tradingview.com/socket.io/websocket` |
//! | `TV_ORIGIN` | `https://prodata.tradingview.com` |
//! | `TV_DISCLAIMER_URL` | `https://www.tradingview.com/disclaimer/` |
//! | `TV_HTTP_TIMEOUT_SECS` | `30` |
//! | `CHART_AMOUNT` | unset (one batch) |
//! | `CHART_TIMEFRAME` | `60` |
//! | `CHART_SERIES` | `candles` |
//! | `CHART_METRICS_PORT` | `0` (disabled) |

use std::str::FromStr;
use std::time::Duration;

use crate::domain::series::{DEFAULT_TIMEFRAME, Timeframe};
use crate::infrastructure::protocol::auth::{
    AuthError, DEFAULT_DISCLAIMER_URL, DEFAULT_HTTP_TIMEOUT, SessionCookie,
};

/// Default chart socket endpoint.
pub const DEFAULT_WEBSOCKET_URL: &str = "wss://prodata.tradingview.com/socket.io/websocket";

/// Default `Origin` header sent with the upgrade request.
pub const DEFAULT_ORIGIN: &str = "https://prodata.tradingview.com";

/// Which series the CLI fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeriesSelection {
    /// OHLCV candles.
    #[default]
    Candles,
    /// Raw indicator points.
    Indicators,
}

impl SeriesSelection {
    /// Get the selection name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Candles => "candles",
            Self::Indicators => "indicators",
        }
    }
}

impl FromStr for SeriesSelection {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "candles" => Ok(Self::Candles),
            "indicators" => Ok(Self::Indicators),
            other => Err(ConfigError::InvalidValue {
                key: "CHART_SERIES".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Transport connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Chart socket URL.
    pub websocket_url: String,
    /// `Origin` header for the upgrade request.
    pub origin: String,
    /// Page the auth token is scraped from.
    pub disclaimer_url: String,
    /// Timeout for the token request.
    pub http_timeout: Duration,
    /// Account session cookie; `None` connects anonymously.
    pub session_id: Option<SessionCookie>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            websocket_url: DEFAULT_WEBSOCKET_URL.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            disclaimer_url: DEFAULT_DISCLAIMER_URL.to_string(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            session_id: None,
        }
    }
}

impl ConnectionSettings {
    /// Settings for an explicit endpoint, anonymous by default.
    #[must_use]
    pub fn with_url(websocket_url: impl Into<String>) -> Self {
        Self {
            websocket_url: websocket_url.into(),
            ..Self::default()
        }
    }

    /// Attach an account session.
    #[must_use]
    pub fn with_session(mut self, session_id: SessionCookie) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Fetch parameters used by the CLI.
#[derive(Debug, Clone, Default)]
pub struct FetchSettings {
    /// Points wanted per symbol; `None` fetches one batch.
    pub amount: Option<usize>,
    /// Bar timeframe.
    pub timeframe: Timeframe,
    /// Series to fetch.
    pub series: SeriesSelection,
}

/// Complete client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Transport settings.
    pub connection: ConnectionSettings,
    /// Fetch parameters.
    pub fetch: FetchSettings,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a timeframe or series selection cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a timeframe or series selection cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ConnectionSettings::default();

        // An empty session id means "not logged in".
        let session_id = match lookup("TV_SESSION_ID") {
            Some(value) if !value.trim().is_empty() => Some(SessionCookie::new(value)?),
            _ => None,
        };

        let connection = ConnectionSettings {
            websocket_url: lookup("TV_WEBSOCKET_URL").unwrap_or(defaults.websocket_url),
            origin: lookup("TV_ORIGIN").unwrap_or(defaults.origin),
            disclaimer_url: lookup("TV_DISCLAIMER_URL").unwrap_or(defaults.disclaimer_url),
            http_timeout: parse_duration_secs(
                lookup("TV_HTTP_TIMEOUT_SECS"),
                defaults.http_timeout,
            ),
            session_id,
        };

        let timeframe = match lookup("CHART_TIMEFRAME") {
            Some(raw) => raw.parse::<Timeframe>().map_err(|_| ConfigError::InvalidValue {
                key: "CHART_TIMEFRAME".to_string(),
                value: raw,
            })?,
            None => DEFAULT_TIMEFRAME,
        };

        let series = lookup("CHART_SERIES")
            .map(|raw| raw.parse::<SeriesSelection>())
            .transpose()?
            .unwrap_or_default();

        let fetch = FetchSettings {
            amount: parse_number(lookup("CHART_AMOUNT")),
            timeframe,
            series,
        };

        Ok(Self {
            connection,
            fetch,
            metrics_port: parse_number(lookup("CHART_METRICS_PORT")).unwrap_or(0),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable holds a value that cannot be used.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
    /// Session cookie was rejected.
    #[error("invalid session id: {0}")]
    Session(#[from] AuthError),
}

fn parse_number<T: FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|v| v.trim().parse().ok())
}

fn parse_duration_secs(raw: Option<String>, default: Duration) -> Duration {
    parse_number::<u64>(raw).map_or(default, Duration::from_secs)
}
