//! Domain Layer - Chart series types and accumulation rules.
//!
//! Pure Rust types with serialization support and no I/O.

/// Series points, candles, timeframes and page accumulation.
pub mod series;
