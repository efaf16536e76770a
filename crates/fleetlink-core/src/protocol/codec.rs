// ============================================
// File: crates/fleetlink-core/src/protocol/codec.rs
// ============================================
//! # Message Codec
//!
//! ## Creation Reason
//! Converts between decrypted frame text and `Message` values. Used by
//! the JSON middleware stage on both pipeline directions.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Decoding failures are `MalformedPayload`, not `InvalidMessage`:
//!   the frame decrypted fine, the content is wrong
//! - Size checks happen in the crypto layer before this runs
//!
//! ## Last Modified
//! v0.1.0 - Initial JSON codec

use crate::error::{CoreError, Result};
use crate::protocol::messages::Message;

/// Trait for encoding and decoding application messages.
pub trait Codec<T> {
    /// Encodes a message into wire text.
    ///
    /// # Errors
    /// Returns an error if the message cannot be represented.
    fn encode(&self, msg: &T) -> Result<String>;

    /// Decodes a message from plaintext bytes.
    ///
    /// # Errors
    /// Returns `MalformedPayload` if the bytes are not a valid message.
    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON codec for [`Message`].
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Creates a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Codec<Message> for JsonCodec {
    fn encode(&self, msg: &Message) -> Result<String> {
        serde_json::to_string(msg).map_err(|e| CoreError::malformed(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        serde_json::from_slice(bytes).map_err(|e| CoreError::malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::MessageType;
    use serde_json::json;

    #[test]
    fn test_json_codec_roundtrip() {
        let codec = JsonCodec::new();
        let msg = Message::command("reboot", json!({"delay": 5})).with_id("c-1");

        let text = codec.encode(&msg).unwrap();
        let decoded = codec.decode(text.as_bytes()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode(b"not json"),
            Err(CoreError::MalformedPayload { .. })
        ));
        assert!(matches!(
            codec.decode(br#"{"type":"unknown","name":"x"}"#),
            Err(CoreError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_json_codec_defaults_missing_fields() {
        let msg = JsonCodec::new().decode(br#"{"type":"event","name":"ping"}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Event);
        assert!(msg.data.is_null());
        assert!(msg.id.is_none());
    }
}
