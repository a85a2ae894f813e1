//! Chart Protocol Message Types
//!
//! Wire format types for the length-prefixed chart protocol.
//!
//! # Inbound Messages
//!
//! - **Keepalive**: a body starting with `~h~`, echoed back verbatim
//! - **Session handshake**: a JSON object carrying `session_id`
//! - **Event**: `{"m": <name>, "p": [<params>...]}`
//!
//! # Outbound Commands
//!
//! Commands use the event shape. The ones issued by this client:
//!
//! | Command | Parameters |
//! |---|---|
//! | `set_auth_token` | `[token]` |
//! | `chart_create_session` | `[cs, ""]` |
//! | `resolve_symbol` | `[cs, "sds_sym_<i>", "={symbol, adjustment}"]` |
//! | `create_series` | `[cs, "sds_1", "s0", "sds_sym_0", timeframe, batch, ""]` |
//! | `modify_series` | `[cs, "sds_1", "s<i>", "sds_sym_<i>", timeframe, ""]` |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::domain::series::{ChartSessionId, Timeframe};

// =============================================================================
// Names
// =============================================================================

/// Event names consumed by the series workflows.
pub mod events {
    /// Candle page for a chart series.
    pub const TIMESCALE_UPDATE: &str = "timescale_update";
    /// Indicator page for a chart series.
    pub const STUDY_UPDATE: &str = "study_update";
    /// The series for the current symbol is fully delivered.
    pub const SERIES_COMPLETED: &str = "series_completed";
    /// The current symbol could not be resolved.
    pub const SYMBOL_ERROR: &str = "symbol_error";
}

/// Command names issued by this client.
pub mod commands {
    /// Authenticate the socket session.
    pub const SET_AUTH_TOKEN: &str = "set_auth_token";
    /// Open a chart session.
    pub const CHART_CREATE_SESSION: &str = "chart_create_session";
    /// Bind a symbol to a symbol slot.
    pub const RESOLVE_SYMBOL: &str = "resolve_symbol";
    /// Create the series for the first symbol.
    pub const CREATE_SERIES: &str = "create_series";
    /// Point the existing series at another symbol.
    pub const MODIFY_SERIES: &str = "modify_series";
}

/// Field whose presence marks a session handshake.
pub const SESSION_ID_FIELD: &str = "session_id";

/// Series slot reused for every symbol of a chart session.
pub const SERIES_SLOT: &str = "sds_1";

/// Symbol slot name for the `index`-th symbol of a fetch.
#[must_use]
pub fn symbol_slot(index: usize) -> String {
    format!("sds_sym_{index}")
}

/// Series turnaround name for the `index`-th symbol of a fetch.
#[must_use]
pub fn turnaround(index: usize) -> String {
    format!("s{index}")
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// A named server event with positional, loosely-typed parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name.
    #[serde(rename = "m")]
    pub name: String,
    /// Positional parameters.
    #[serde(rename = "p", default)]
    pub params: Vec<Value>,
}

impl Event {
    /// Create an event.
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Positional parameter at `index`.
    #[must_use]
    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index)
    }
}

/// Session handshake sent by the server right after connecting.
#[derive(Debug, Clone, PartialEq)]
pub struct Handshake {
    fields: Map<String, Value>,
}

impl Handshake {
    /// Wrap the parsed handshake object.
    #[must_use]
    pub const fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Server-assigned session identifier, when it is a string.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.fields.get(SESSION_ID_FIELD).and_then(Value::as_str)
    }

    /// Any other handshake field (protocol version, timestamps, ...).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// One classified message extracted from a transport payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Heartbeat; carries the exact frame to echo back.
    Keepalive(String),
    /// Session handshake.
    SessionHandshake(Handshake),
    /// Named event.
    Event(Event),
}

impl Frame {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Keepalive(_) => "keepalive",
            Self::SessionHandshake(_) => "handshake",
            Self::Event(_) => "event",
        }
    }
}

// =============================================================================
// Outbound Commands
// =============================================================================

/// Command sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    /// Command name.
    #[serde(rename = "m")]
    pub name: String,
    /// Positional parameters.
    #[serde(rename = "p")]
    pub params: Vec<Value>,
}

/// Symbol descriptor embedded in `resolve_symbol`; field order is kept on the wire.
#[derive(Serialize)]
struct SymbolDescriptor<'a> {
    symbol: &'a str,
    adjustment: &'static str,
}

impl Command {
    /// Create a command.
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// `set_auth_token [token]`.
    #[must_use]
    pub fn set_auth_token(token: &str) -> Self {
        Self::new(commands::SET_AUTH_TOKEN, vec![json!(token)])
    }

    /// `chart_create_session [cs, ""]`.
    #[must_use]
    pub fn chart_create_session(chart_session: &ChartSessionId) -> Self {
        Self::new(
            commands::CHART_CREATE_SESSION,
            vec![json!(chart_session.as_str()), json!("")],
        )
    }

    /// `resolve_symbol [cs, slot, "=" + {"symbol", "adjustment": "splits"}]`.
    #[must_use]
    pub fn resolve_symbol(chart_session: &ChartSessionId, index: usize, symbol: &str) -> Self {
        let descriptor = SymbolDescriptor {
            symbol,
            adjustment: "splits",
        };
        // Serializing two string fields cannot fail.
        let descriptor = serde_json::to_string(&descriptor).unwrap_or_default();

        Self::new(
            commands::RESOLVE_SYMBOL,
            vec![
                json!(chart_session.as_str()),
                json!(symbol_slot(index)),
                json!(format!("={descriptor}")),
            ],
        )
    }

    /// `create_series [cs, "sds_1", "s0", "sds_sym_0", timeframe, batch, ""]`.
    #[must_use]
    pub fn create_series(
        chart_session: &ChartSessionId,
        timeframe: Timeframe,
        batch_size: usize,
    ) -> Self {
        Self::new(
            commands::CREATE_SERIES,
            vec![
                json!(chart_session.as_str()),
                json!(SERIES_SLOT),
                json!(turnaround(0)),
                json!(symbol_slot(0)),
                json!(timeframe.to_string()),
                json!(batch_size),
                json!(""),
            ],
        )
    }

    /// `modify_series [cs, "sds_1", "s<i>", "sds_sym_<i>", timeframe, ""]`.
    #[must_use]
    pub fn modify_series(chart_session: &ChartSessionId, index: usize, timeframe: Timeframe) -> Self {
        Self::new(
            commands::MODIFY_SERIES,
            vec![
                json!(chart_session.as_str()),
                json!(SERIES_SLOT),
                json!(turnaround(index)),
                json!(symbol_slot(index)),
                json!(timeframe.to_string()),
                json!(""),
            ],
        )
    }
}
