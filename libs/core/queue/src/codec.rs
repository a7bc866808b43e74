//! Transport-safe encoding of protocol payloads.
//!
//! Payloads travel as base64 over JSON so they survive any fabric that
//! mangles binary or whitespace. Decoding is permissive: a body that is
//! not JSON comes through as a plain string, matching what untyped peers
//! on the same channels send.

use crate::error::QueueError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use thiserror::Error;
use tracing::error;

/// A payload that could not be decoded at the transport level.
///
/// JSON parse failures are not decode errors (see [`decode`]); this only
/// covers bodies that are not valid base64/UTF-8 at all.
#[derive(Debug, Error)]
#[error("failed to decode payload: {0}")]
pub struct DecodeError(String);

/// Serialize a payload for the wire.
///
/// Logs the offending payload before failing so a cyclic or otherwise
/// unserializable structure can be diagnosed.
pub fn encode<T: Serialize + Debug>(payload: &T) -> Result<Bytes, QueueError> {
    let json = serde_json::to_string(payload).map_err(|source| {
        error!(payload = ?payload, error = %source, "failed to convert request data to string");
        QueueError::Encode { source }
    })?;
    Ok(Bytes::from(BASE64.encode(json)))
}

/// Decode a wire payload back into a JSON value.
///
/// A body that base64-decodes but does not parse as JSON is returned as a
/// plain string value rather than an error; peers that need structure check
/// for it explicitly. Only a body that is not valid base64/UTF-8 fails.
pub fn decode(payload: &[u8]) -> Result<Value, DecodeError> {
    let raw = BASE64
        .decode(payload)
        .map_err(|e| DecodeError(e.to_string()))?;
    let text = String::from_utf8(raw).map_err(|e| DecodeError(e.to_string()))?;
    match serde_json::from_str(&text) {
        Ok(value) => Ok(value),
        Err(_) => Ok(Value::String(text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_roundtrip() {
        let payload = json!({"field": "value", "nested": {"n": 1}});
        let wire = encode(&payload).unwrap();
        assert_eq!(decode(&wire).unwrap(), payload);
    }

    #[test]
    fn wire_form_is_base64_json() {
        let wire = encode(&json!({"data": {}})).unwrap();
        let raw = BASE64.decode(&wire[..]).unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&raw).unwrap(),
            json!({"data": {}})
        );
    }

    #[test]
    fn non_json_body_decodes_to_string() {
        let wire = BASE64.encode("plain text, not json");
        let value = decode(wire.as_bytes()).unwrap();
        assert_eq!(value, Value::String("plain text, not json".to_string()));
    }

    #[test]
    fn invalid_base64_is_a_decode_error() {
        assert!(decode(b"%%% not base64 %%%").is_err());
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let wire = BASE64.encode([0xff, 0xfe, 0x00, 0x01]);
        assert!(decode(wire.as_bytes()).is_err());
    }

}
