// ============================================
// File: crates/fleetlink-core/src/protocol/messages.rs
// ============================================
//! # Application Message Definitions
//!
//! ## Creation Reason
//! Defines the JSON messages exchanged with devices once the codec layer
//! has decrypted a frame.
//!
//! ## Main Functionality
//! - `MessageType`: `rpc` / `cmd` / `event`
//! - `Message`: The application message envelope
//! - `DeviceHello`: Payload of the `connect` event opening a session
//!
//! ## Wire Format (JSON)
//! ```text
//! { "id": "...", "type": "rpc|cmd|event", "name": "...",
//!   "model": "...", "data": {...}, "error": ... }
//! ```
//! `id`, `model` and `error` are omitted when absent.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Replies are matched to requests by `id` only
//! - A non-null `error` on a reply fails the pending request
//! - Keep field names stable; device firmware parses them
//!
//! ## Last Modified
//! v0.1.0 - Initial message definitions

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::SymmetricKey;

// ============================================
// Constants
// ============================================

/// Event name of the device hello.
pub const HELLO_EVENT: &str = "connect";

/// Event name of the key-delivery reply.
pub const KEY_EVENT: &str = "key";

// ============================================
// MessageType
// ============================================

/// Application message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Request/response call.
    Rpc,
    /// Serialized command.
    Cmd,
    /// Unsolicited event.
    Event,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rpc => "rpc",
            Self::Cmd => "cmd",
            Self::Event => "event",
        };
        f.write_str(s)
    }
}

// ============================================
// Message
// ============================================

/// Application message.
///
/// # Example
/// ```
/// use fleetlink_core::protocol::{Message, MessageType};
/// use serde_json::json;
///
/// let msg = Message::rpc("get_stats", json!({})).with_id("42");
/// assert_eq!(msg.kind, MessageType::Rpc);
/// assert_eq!(msg.id.as_deref(), Some("42"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id for request/response matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Method or event name.
    #[serde(default)]
    pub name: String,

    /// Device model the message refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Payload.
    #[serde(default)]
    pub data: Value,

    /// Error reported by the peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Message {
    /// Creates a message of the given kind.
    pub fn new(kind: MessageType, name: impl Into<String>, data: Value) -> Self {
        Self {
            id: None,
            kind,
            name: name.into(),
            model: None,
            data,
            error: None,
        }
    }

    /// Creates an `rpc` message.
    pub fn rpc(name: impl Into<String>, data: Value) -> Self {
        Self::new(MessageType::Rpc, name, data)
    }

    /// Creates a `cmd` message.
    pub fn command(name: impl Into<String>, data: Value) -> Self {
        Self::new(MessageType::Cmd, name, data)
    }

    /// Creates an `event` message.
    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Self::new(MessageType::Event, name, data)
    }

    /// Builds the key-delivery event for a newly issued device key.
    #[must_use]
    pub fn key_delivery(model: Option<String>, key: &SymmetricKey) -> Self {
        let mut msg = Self::event(
            KEY_EVENT,
            serde_json::json!({ "key": key.to_delivery_string() }),
        );
        msg.model = model;
        msg
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the error field.
    #[must_use]
    pub fn with_error(mut self, error: Value) -> Self {
        self.error = Some(error);
        self
    }

    /// Returns `true` if the message carries a non-null error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.as_ref().is_some_and(|e| !e.is_null())
    }

    /// Returns a printable form of the error field.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => Some(
                map.get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| Value::Object(map.clone()).to_string(), str::to_string),
            ),
            other => Some(other.to_string()),
        }
    }

    /// Returns `true` if this is the device hello event.
    #[must_use]
    pub fn is_hello(&self) -> bool {
        self.kind == MessageType::Event && self.name == HELLO_EVENT
    }
}

/// Generates a random correlation id (16 hex chars).
#[must_use]
pub fn generate_message_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ============================================
// DeviceHello
// ============================================

/// Payload of the `connect` event a device sends first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHello {
    /// Device MAC as reported by firmware.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    /// Hardware model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Firmware version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
}

impl DeviceHello {
    /// Extracts the hello from a `connect` event.
    ///
    /// Returns `None` if the message is not a hello. Unknown fields are
    /// ignored; a non-object payload yields an empty hello.
    #[must_use]
    pub fn from_message(msg: &Message) -> Option<Self> {
        if !msg.is_hello() {
            return None;
        }
        let mut hello: Self = serde_json::from_value(msg.data.clone()).unwrap_or_default();
        if hello.model.is_none() {
            hello.model.clone_from(&msg.model);
        }
        Some(hello)
    }
}

// ============================================
// Tests
// ============================================
