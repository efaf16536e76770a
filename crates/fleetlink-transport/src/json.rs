// ============================================
// File: crates/fleetlink-transport/src/json.rs
// ============================================
//! # JSON Stage
//!
//! ## Creation Reason
//! Sits directly inside the codec stage: turns decrypted text into
//! `Message`s on the way in, and messages into text on the way out.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Parse failures are reported as `CoreError::MalformedPayload` and
//!   routed to error hooks; this stage does not decide policy
//! - Envelopes that are already text pass through outgoing untouched
//!
//! ## Last Modified
//! v0.1.0 - Initial JSON stage

use async_trait::async_trait;
use fleetlink_core::protocol::{Codec, Envelope, JsonCodec, Payload};
use tracing::trace;

use crate::connection::Connection;
use crate::error::Result;
use crate::middleware::{Capabilities, Middleware};

/// Parses and serializes application messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonStage {
    codec: JsonCodec,
}

impl JsonStage {
    /// Creates a new JSON stage.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            codec: JsonCodec::new(),
        }
    }
}

#[async_trait]
impl Middleware for JsonStage {
    fn name(&self) -> &'static str {
        "json"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::duplex()
    }

    async fn incoming(&self, conn: &Connection, envelope: Envelope) -> Result<Option<Envelope>> {
        let Payload::Text(text) = &envelope.payload else {
            return Ok(Some(envelope));
        };
        let message = self.codec.decode(text.as_bytes())?;
        trace!(
            connection_id = %conn.id(),
            kind = %message.kind,
            name = %message.name,
            "Parsed message"
        );
        Ok(Some(envelope.map_payload(Payload::Message(message))))
    }

    async fn outgoing(&self, _conn: &Connection, envelope: Envelope) -> Result<Option<Envelope>> {
        let Payload::Message(message) = &envelope.payload else {
            return Ok(Some(envelope));
        };
        let text = self.codec.encode(message)?;
        Ok(Some(envelope.map_payload(Payload::Text(text))))
    }
}
