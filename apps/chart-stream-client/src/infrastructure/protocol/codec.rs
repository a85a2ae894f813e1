//! Frame Codec Module
//!
//! Splits raw transport payloads into classified [`Frame`]s and frames
//! outbound commands.
//!
//! # Framing
//!
//! Every message is preceded by `~m~<length>~m~`. One WebSocket text payload
//! may carry any number of messages back to back:
//!
//! ```text
//! ~m~4~m~~h~1~m~31~m~{"m":"series_completed","p":[]}
//! ```
//!
//! Lengths are counted in UTF-16 code units.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::messages::{Command, Event, Frame, Handshake, SESSION_ID_FIELD};

/// Prefix of a keepalive body.
pub const KEEPALIVE_MARKER: &str = "~h~";

/// Longest body excerpt kept in a [`CodecError::MalformedFrame`].
const EXCERPT_LEN: usize = 80;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// One message could not be decoded. Other messages of the payload are unaffected.
    #[error("malformed frame: {reason} (body: {excerpt})")]
    MalformedFrame {
        /// Why decoding failed.
        reason: String,
        /// Leading part of the offending body.
        excerpt: String,
    },

    /// A command could not be serialized.
    #[error("JSON encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CodecError {
    fn malformed(reason: impl ToString, body: &str) -> Self {
        Self::MalformedFrame {
            reason: reason.to_string(),
            excerpt: body.chars().take(EXCERPT_LEN).collect(),
        }
    }
}

/// Stateless codec for the length-prefixed chart protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a raw payload into frames, in payload order.
    ///
    /// An empty payload yields no frames. A message that fails to decode
    /// yields an `Err` in its position; the messages around it still decode.
    #[must_use]
    pub fn decode(&self, payload: &str) -> Vec<Result<Frame, CodecError>> {
        if payload.is_empty() {
            return Vec::new();
        }

        delimiter()
            .split(payload)
            .skip(1)
            .map(decode_body)
            .collect()
    }

    /// Serialize and frame a command.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, command: &Command) -> Result<String, CodecError> {
        let body = serde_json::to_string(command)?;
        Ok(frame(&body))
    }
}

/// Prefix `body` with its length header.
#[must_use]
pub fn frame(body: &str) -> String {
    format!("~m~{}~m~{body}", body.encode_utf16().count())
}

#[allow(clippy::expect_used)] // Regex is a compile-time constant
fn delimiter() -> &'static Regex {
    static DELIMITER: OnceLock<Regex> = OnceLock::new();
    DELIMITER.get_or_init(|| Regex::new(r"~m~\d+~m~").expect("frame delimiter regex is valid"))
}

fn decode_body(body: &str) -> Result<Frame, CodecError> {
    if body.starts_with(KEEPALIVE_MARKER) {
        return Ok(Frame::Keepalive(frame(body)));
    }

    let value: Value = serde_json::from_str(body).map_err(|e| CodecError::malformed(e, body))?;

    match value {
        Value::Object(fields) if fields.contains_key(SESSION_ID_FIELD) => {
            Ok(Frame::SessionHandshake(Handshake::new(fields)))
        }
        other => serde_json::from_value::<Event>(other)
            .map(Frame::Event)
            .map_err(|e| CodecError::malformed(e, body)),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn decode_ok(payload: &str) -> Vec<Frame> {
        FrameCodec::new()
            .decode(payload)
            .into_iter()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn empty_payload_yields_nothing() {
        assert!(FrameCodec::new().decode("").is_empty());
    }

    #[test]
    fn keepalive_echo_is_byte_identical() {
        let body = "~h~42";
        let payload = format!("~m~{}~m~{body}", body.len());

        let frames = decode_ok(&payload);
        assert_eq!(frames, vec![Frame::Keepalive("~m~5~m~~h~42".to_string())]);
        assert_eq!(frames[0], Frame::Keepalive(payload));
    }

    #[test]
    fn concatenated_events_keep_order() {
        let first = r#"{"m":"timescale_update","p":["cs_a",{"sds_1":{"s":[]}}]}"#;
        let second = r#"{"m":"series_completed","p":["cs_a","sds_1"]}"#;
        let payload = format!("{}{}", frame(first), frame(second));

        let frames = decode_ok(&payload);
        assert_eq!(
            frames,
            vec![
                Frame::Event(Event::new(
                    "timescale_update",
                    vec![json!("cs_a"), json!({"sds_1": {"s": []}})]
                )),
                Frame::Event(Event::new(
                    "series_completed",
                    vec![json!("cs_a"), json!("sds_1")]
                )),
            ]
        );
    }

    #[test]
    fn session_id_marks_handshake_regardless_of_other_fields() {
        let payload = frame(r#"{"m":"ignored","p":[],"session_id":"s1","javastudies":"3.66"}"#);

        match &decode_ok(&payload)[0] {
            Frame::SessionHandshake(handshake) => {
                assert_eq!(handshake.session_id(), Some("s1"));
            }
            other => panic!("expected handshake, got {other:?}"),
        }
    }

    #[test]
    fn object_without_session_id_is_event() {
        let payload = frame(r#"{"m":"quote_completed","p":["qs_1"],"session":"x"}"#);
        assert!(matches!(&decode_ok(&payload)[0], Frame::Event(e) if e.name == "quote_completed"));
    }

    #[test]
    fn event_without_params_has_empty_list() {
        let payload = frame(r#"{"m":"protocol_error"}"#);
        assert_eq!(
            decode_ok(&payload),
            vec![Frame::Event(Event::new("protocol_error", vec![]))]
        );
    }

    #[test]
    fn malformed_frame_does_not_affect_neighbours() {
        let payload = format!(
            "{}{}{}",
            frame(r#"{"m":"a","p":[]}"#),
            frame("{not json"),
            frame(r#"{"m":"b","p":[1]}"#)
        );

        let frames = FrameCodec::new().decode(&payload);
        assert_eq!(frames.len(), 3);
        assert!(matches!(&frames[0], Ok(Frame::Event(e)) if e.name == "a"));
        assert!(matches!(&frames[1], Err(CodecError::MalformedFrame { .. })));
        assert!(matches!(&frames[2], Ok(Frame::Event(e)) if e.params == vec![json!(1)]));
    }

    #[test]
    fn wrong_event_shape_is_malformed() {
        for body in [r#"{"m":1,"p":[]}"#, r#"{"m":"x","p":{}}"#, "[1,2]", "7"] {
            let frames = FrameCodec::new().decode(&frame(body));
            assert!(
                matches!(&frames[0], Err(CodecError::MalformedFrame { .. })),
                "body {body} should be malformed"
            );
        }
    }

    #[test]
    fn encode_frames_command() {
        let encoded = FrameCodec::new()
            .encode(&Command::set_auth_token("unauthorized_user_token"))
            .unwrap();
        assert_eq!(
            encoded,
            r#"~m~54~m~{"m":"set_auth_token","p":["unauthorized_user_token"]}"#
        );
    }

    #[test]
    fn length_counts_utf16_units() {
        // "é" is two UTF-8 bytes but one UTF-16 unit.
        assert_eq!(frame("é"), "~m~1~m~é");
        assert_eq!(frame("😀"), "~m~2~m~😀");
    }

    proptest! {
        #[test]
        fn keepalive_echo_matches_reference(counter in "[0-9]{1,9}") {
            let body = format!("~h~{counter}");
            let payload = format!("~m~{}~m~{body}", body.len());
            let frames = decode_ok(&payload);
            prop_assert_eq!(frames, vec![Frame::Keepalive(payload)]);
        }

        #[test]
        fn decoded_events_follow_payload_order(names in prop::collection::vec("[a-z_]{1,24}", 0..8)) {
            let codec = FrameCodec::new();
            let payload: String = names
                .iter()
                .map(|name| codec.encode(&Command::new(name.clone(), vec![json!(name)])).unwrap())
                .collect();

            let decoded: Vec<String> = decode_ok(&payload)
                .into_iter()
                .map(|frame| match frame {
                    Frame::Event(event) => event.name,
                    other => panic!("unexpected frame {other:?}"),
                })
                .collect();
            prop_assert_eq!(decoded, names);
        }
    }
}
