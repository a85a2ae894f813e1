//! Chart Series Types
//!
//! Codec-agnostic types for historical chart series: the raw points pushed by
//! the server, the normalized [`Candle`], request parameters, and the page
//! accumulation rules applied while a symbol is in flight.
//!
//! # Paging
//!
//! The server answers a series request with pages ordered newest to oldest.
//! Each page is older than the one before it, so pages are prepended to the
//! accumulated list. Pages longer than the requested batch size repeat the
//! history already received and are trimmed before being prepended.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Constants
// =============================================================================

/// Largest page the server will serve for one series request.
pub const MAX_BATCH_SIZE: usize = 5000;

/// Timeframe used when a request does not specify one.
pub const DEFAULT_TIMEFRAME: Timeframe = Timeframe::Interval(60);

/// Number of values a point needs to become a [`Candle`] (volume is optional).
const CANDLE_MIN_VALUES: usize = 5;

const CHART_SESSION_PREFIX: &str = "cs_";
const CHART_SESSION_RANDOM_LEN: usize = 12;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by series types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeriesError {
    /// A point does not carry enough values to map to the output record.
    #[error("series point {index} has {len} values, expected at least {expected}")]
    TooFewValues {
        /// Server-side index of the point.
        index: i64,
        /// Number of values the point carried.
        len: usize,
        /// Number of values required.
        expected: usize,
    },

    /// A value the output record needs is not a number.
    #[error("series point {index} has a non-numeric value at position {position}")]
    NonNumericValue {
        /// Server-side index of the point.
        index: i64,
        /// Position within the value vector.
        position: usize,
    },

    /// Timeframe text is neither a positive interval nor a calendar period.
    #[error("unknown timeframe: {0}")]
    UnknownTimeframe(String),
}

// =============================================================================
// Series Points
// =============================================================================

/// One element of a server-pushed series page.
///
/// The positions of `values` are fixed by the series type: candles carry
/// `[time, open, high, low, close, volume]`, studies carry their own outputs.
/// Values are kept as received; studies may publish `null` for bars where
/// they have no output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSeriesPoint {
    /// Bar index assigned by the server.
    #[serde(rename = "i")]
    pub index: i64,
    /// Value vector.
    #[serde(rename = "v")]
    pub values: Vec<Value>,
}

impl RawSeriesPoint {
    /// Numeric value at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::NonNumericValue`] if the value is missing or
    /// not a number.
    pub fn number(&self, position: usize) -> Result<f64, SeriesError> {
        self.values
            .get(position)
            .and_then(Value::as_f64)
            .ok_or(SeriesError::NonNumericValue {
                index: self.index,
                position,
            })
    }
}

/// Indicator output: the raw point, passed through untouched.
pub type IndicatorPoint = RawSeriesPoint;

/// Normalized OHLCV record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time in epoch seconds.
    pub timestamp: i64,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Traded volume, `0.0` for symbols that publish none.
    pub volume: f64,
}

impl Candle {
    /// Bar open time as a UTC datetime.
    #[must_use]
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

impl TryFrom<&RawSeriesPoint> for Candle {
    type Error = SeriesError;

    #[allow(clippy::cast_possible_truncation)]
    fn try_from(point: &RawSeriesPoint) -> Result<Self, Self::Error> {
        let v = &point.values;
        if v.len() < CANDLE_MIN_VALUES {
            return Err(SeriesError::TooFewValues {
                index: point.index,
                len: v.len(),
                expected: CANDLE_MIN_VALUES,
            });
        }

        Ok(Self {
            timestamp: point.number(0)? as i64,
            open: point.number(1)?,
            high: point.number(2)?,
            low: point.number(3)?,
            close: point.number(4)?,
            volume: v.get(5).and_then(Value::as_f64).unwrap_or(0.0),
        })
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Bar resolution of a series request.
///
/// Sent on the wire as text: the interval number, or one of the calendar
/// period tokens `1D`, `1W`, `1M`, `12M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    /// Numeric interval.
    Interval(u32),
    /// One day.
    Day,
    /// One week.
    Week,
    /// One month.
    Month,
    /// Twelve months.
    Year,
}

impl Default for Timeframe {
    fn default() -> Self {
        DEFAULT_TIMEFRAME
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval(n) => write!(f, "{n}"),
            Self::Day => f.write_str("1D"),
            Self::Week => f.write_str("1W"),
            Self::Month => f.write_str("1M"),
            Self::Year => f.write_str("12M"),
        }
    }
}

impl FromStr for Timeframe {
    type Err = SeriesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "1D" => Ok(Self::Day),
            "1W" => Ok(Self::Week),
            "1M" => Ok(Self::Month),
            "12M" => Ok(Self::Year),
            other => match other.parse::<u32>() {
                Ok(n) if n > 0 => Ok(Self::Interval(n)),
                _ => Err(SeriesError::UnknownTimeframe(s.to_string())),
            },
        }
    }
}

/// Page size to request for a given `amount`.
///
/// `None` and `Some(0)` both mean "as much as the server allows".
#[must_use]
pub fn batch_size(amount: Option<usize>) -> usize {
    amount
        .filter(|&a| a > 0)
        .map_or(MAX_BATCH_SIZE, |a| a.min(MAX_BATCH_SIZE))
}

// =============================================================================
// Chart Session Identifier
// =============================================================================

/// Correlation token scoping every command of one fetch call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChartSessionId(String);

impl ChartSessionId {
    /// Generate a fresh identifier: `cs_` followed by 12 random alphanumerics.
    #[must_use]
    pub fn generate() -> Self {
        let suffix: String = rand::rng()
            .sample_iter(rand::distr::Alphanumeric)
            .take(CHART_SESSION_RANDOM_LEN)
            .map(char::from)
            .collect();
        Self(format!("{CHART_SESSION_PREFIX}{suffix}"))
    }

    /// Borrow the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChartSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Series Buffer
// =============================================================================

/// Accumulates the pages received for the symbol currently in flight.
#[derive(Debug, Clone, Default)]
pub struct SeriesBuffer {
    points: Vec<RawSeriesPoint>,
    batch_size: usize,
}

impl SeriesBuffer {
    /// Create an empty buffer for pages requested with `batch_size`.
    #[must_use]
    pub const fn new(batch_size: usize) -> Self {
        Self {
            points: Vec::new(),
            batch_size,
        }
    }

    /// Number of points accumulated so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether nothing has been accumulated yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Merge a newly received (older) page in front of the accumulated points.
    ///
    /// A page longer than the batch size ends with points that were already
    /// accumulated; exactly `self.len()` trailing points are dropped from it
    /// before it is prepended.
    pub fn absorb_page(&mut self, mut page: Vec<RawSeriesPoint>) {
        if page.len() > self.batch_size {
            let keep = page.len().saturating_sub(self.points.len());
            page.truncate(keep);
        }
        page.append(&mut self.points);
        self.points = page;
    }

    /// Take the accumulated points, keeping only the first `amount` when given,
    /// and leave the buffer empty for the next symbol.
    pub fn take(&mut self, amount: Option<usize>) -> Vec<RawSeriesPoint> {
        let mut points = std::mem::take(&mut self.points);
        if let Some(amount) = amount.filter(|&a| a > 0) {
            points.truncate(amount);
        }
        points
    }
}

// =============================================================================
// Tests
// =============================================================================
