//! Codecs for EtherSpy's inbound and outbound text formats.
//!
//! The decoding engine interleaves human-readable log lines and JSON
//! telemetry on one stream, separated only by line breaks. A trimmed line
//! that starts with `{`, ends with `}` and decodes as a JSON object is
//! telemetry; everything else is a diagnostic.

use crate::messages::{ClientMessage, ServerMessage};
use etherspy_core::RawTelemetry;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON (de)serialization failed.
    #[error("Failed to (de)serialize message: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is not valid UTF-8.
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Classification of one engine output line.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineLine<'a> {
    /// Blank line.
    Empty,
    /// Decoded telemetry object.
    Telemetry(RawTelemetry),
    /// Anything else, trimmed.
    Diagnostic(&'a str),
}

/// Classify a line of engine output.
pub fn classify_line(line: &str) -> EngineLine<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return EngineLine::Empty;
    }
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        if let Ok(map) = serde_json::from_str::<RawTelemetry>(trimmed) {
            return EngineLine::Telemetry(map);
        }
    }
    EngineLine::Diagnostic(trimmed)
}

/// Decode a broker message payload.
///
/// Any JSON value is accepted here; the normalizer decides whether it is a
/// sensor record.
pub fn decode_broker_payload(payload: &[u8]) -> Result<Value, CodecError> {
    let text = std::str::from_utf8(payload).map_err(|_| CodecError::InvalidUtf8)?;
    serde_json::from_str(text).map_err(CodecError::from)
}

/// Encode a server message to JSON string for WebSocket transmission.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::from)
}

/// Decode a client message from JSON string received over WebSocket.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, CodecError> {
    serde_json::from_str(text).map_err(CodecError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::HelloMessage;

    #[test]
    fn test_telemetry_line() {
        let line = r#"  {"time":"2024-01-17 10:30:00","model":"Nexus-TH","id":34,"temperature_C":20.1}  "#;
        match classify_line(line) {
            EngineLine::Telemetry(map) => {
                assert_eq!(map["model"], "Nexus-TH");
                assert_eq!(map["id"], 34);
            }
            other => panic!("Expected telemetry, got {other:?}"),
        }
    }

    #[test]
    fn test_diagnostic_lines() {
        assert_eq!(
            classify_line("Found Rafael Micro R820T tuner\n"),
            EngineLine::Diagnostic("Found Rafael Micro R820T tuner")
        );
        assert_eq!(
            classify_line("[SDR] Tuned to 433.920MHz."),
            EngineLine::Diagnostic("[SDR] Tuned to 433.920MHz.")
        );
    }

    #[test]
    fn test_broken_json_falls_back_to_diagnostic() {
        assert_eq!(
            classify_line("{not json}"),
            EngineLine::Diagnostic("{not json}")
        );
        assert_eq!(
            classify_line(r#"{"id": 1"#),
            EngineLine::Diagnostic(r#"{"id": 1"#)
        );
    }

    #[test]
    fn test_empty_lines() {
        assert_eq!(classify_line(""), EngineLine::Empty);
        assert_eq!(classify_line("   \r"), EngineLine::Empty);
    }

    #[test]
    fn test_broker_payload() {
        let value = decode_broker_payload(br#"{"id": 3, "model": "Oregon"}"#).unwrap();
        assert_eq!(value["id"], 3);

        let value = decode_broker_payload(b"21.5").unwrap();
        assert_eq!(value, serde_json::json!(21.5));

        assert!(decode_broker_payload(b"online").is_err());
        assert!(matches!(
            decode_broker_payload(&[0xff, 0xfe]),
            Err(CodecError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_encode_hello() {
        let msg = ServerMessage::Hello(HelloMessage::new("test", "0.1.0"));
        let json = encode_server_message(&msg).unwrap();

        assert!(json.contains("\"name\":\"test\""));
        assert!(json.contains("\"event\":\"hello\""));
    }

    #[test]
    fn test_decode_client_message() {
        assert_eq!(
            decode_client_message(r#"{"request":"snapshot"}"#).unwrap(),
            ClientMessage::Snapshot
        );
        assert!(decode_client_message("snapshot please").is_err());
    }
}
