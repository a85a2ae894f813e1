//! Configuration Module
//!
//! Configuration loading for the chart client.

mod settings;

pub use settings::{
    ClientConfig, ConfigError, ConnectionSettings, DEFAULT_ORIGIN, DEFAULT_WEBSOCKET_URL,
    FetchSettings, SeriesSelection,
};
