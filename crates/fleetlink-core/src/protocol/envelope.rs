// ============================================
// File: crates/fleetlink-core/src/protocol/envelope.rs
// ============================================
//! # Pipeline Envelope
//!
//! ## Creation Reason
//! Middleware stages transform a payload layer by layer: the codec sees
//! text frames, the JSON stage turns them into `Message`s and back. The
//! envelope carries the payload together with out-of-band metadata that
//! must never reach the wire.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `Meta` is NOT serialized; it only lives inside the process
//! - `key_override` is honoured by the v2 codec for exactly one frame
//!
//! ## Last Modified
//! v0.1.0 - Initial envelope

use crate::crypto::SymmetricKey;
use crate::protocol::messages::Message;

/// Payload at some layer of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Wire text (encrypted or plain JSON, depending on the layer).
    Text(String),
    /// Parsed application message.
    Message(Message),
}

impl Payload {
    /// Returns the message if this payload has been parsed.
    #[must_use]
    pub const fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(m) => Some(m),
            Self::Text(_) => None,
        }
    }

    /// Returns the text if this payload is still raw.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Message(_) => None,
        }
    }
}

/// Per-message metadata that never leaves the process.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    /// Encrypt this frame under the given key instead of the session key.
    pub key_override: Option<SymmetricKey>,
}

/// A payload travelling through the middleware pipeline.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The payload.
    pub payload: Payload,
    /// Out-of-band metadata.
    pub meta: Meta,
}

impl Envelope {
    /// Wraps raw wire text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: Payload::Text(text.into()),
            meta: Meta::default(),
        }
    }

    /// Wraps an application message.
    #[must_use]
    pub fn message(message: Message) -> Self {
        Self {
            payload: Payload::Message(message),
            meta: Meta::default(),
        }
    }

    /// Sets a one-shot encryption key override.
    #[must_use]
    pub fn with_key_override(mut self, key: SymmetricKey) -> Self {
        self.meta.key_override = Some(key);
        self
    }

    /// Replaces the payload, keeping the metadata.
    #[must_use]
    pub fn map_payload(self, payload: Payload) -> Self {
        Self {
            payload,
            meta: self.meta,
        }
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        Self::message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_payload_keeps_meta() {
        let key = SymmetricKey::generate();
        let env = Envelope::message(Message::event("key", json!({})))
            .with_key_override(key.clone());

        let mapped = env.map_payload(Payload::Text("{}".into()));
        assert_eq!(mapped.payload.as_text(), Some("{}"));
        assert_eq!(mapped.meta.key_override, Some(key));
    }
}
