//! Application Services
//!
//! Workflows that orchestrate domain logic over the session port.
//!
//! - `series_fetch`: Historical candles and indicator series for a symbol list

mod series_fetch;

pub use series_fetch::{
    Candles, FetchError, FetchOutcome, FetchRequest, Indicators, SeriesKind, fetch_candles,
    fetch_candles_with_session, fetch_indicators, fetch_series, fetch_series_with_session,
};
