// ============================================
// File: crates/fleetlink-server/src/codec/v1.rs
// ============================================
//! # Codec v1 Stage
//!
//! Legacy codec: one AES-256-CBC key and IV sliced from the master
//! secret, shared by every device. No key lifecycle and no device
//! identity at this layer.

use async_trait::async_trait;
use fleetlink_core::crypto::{decrypt_v1, encrypt_v1};
use fleetlink_core::protocol::{Envelope, Payload};
use fleetlink_core::{CoreError, LegacyKey, MasterSecret};
use fleetlink_transport::{Capabilities, Connection, ConnectionError, Middleware, Result};

use super::drop_codec_error;

const STAGE: &str = "codec-v1";

/// v1 codec stage.
pub struct CodecV1Stage {
    key: LegacyKey,
}

impl CodecV1Stage {
    /// Creates the stage from the master secret.
    #[must_use]
    pub fn new(master: &MasterSecret) -> Self {
        Self { key: master.v1_key() }
    }
}

#[async_trait]
impl Middleware for CodecV1Stage {
    fn name(&self) -> &'static str {
        STAGE
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::duplex().with_error()
    }

    async fn incoming(&self, _conn: &Connection, envelope: Envelope) -> Result<Option<Envelope>> {
        let Payload::Text(text) = &envelope.payload else {
            return Ok(Some(envelope));
        };
        let plaintext = decrypt_v1(&self.key, text)?;
        let text = String::from_utf8(plaintext)
            .map_err(|_| CoreError::invalid_message("v1 plaintext is not UTF-8"))?;
        Ok(Some(envelope.map_payload(Payload::Text(text))))
    }

    async fn outgoing(&self, _conn: &Connection, envelope: Envelope) -> Result<Option<Envelope>> {
        let Payload::Text(text) = &envelope.payload else {
            return Ok(Some(envelope));
        };
        let frame = encrypt_v1(&self.key, text.as_bytes())?;
        Ok(Some(Envelope::text(frame)))
    }

    async fn on_error(&self, conn: &Connection, error: ConnectionError) -> Option<ConnectionError> {
        drop_codec_error(STAGE, conn, error)
    }
}

impl std::fmt::Debug for CodecV1Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecV1Stage").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fleetlink_core::protocol::Message;
    use fleetlink_transport::{ConnectionOptions, JsonStage, MockSocket};
    use serde_json::json;

    #[tokio::test]
    async fn test_v1_stage_roundtrip() {
        let master = MasterSecret::generate();
        let key = master.v1_key();
        let socket = Arc::new(MockSocket::new());
        let conn = Connection::new(socket.clone(), ConnectionOptions::default());
        conn.use_stage(CodecV1Stage::new(&master));
        conn.use_stage(JsonStage::new());
        let mut inbox = conn.subscribe();
        {
            let conn = conn.clone();
            tokio::spawn(async move { conn.run().await });
        }

        // Garbage is dropped, the session continues
        socket.inject("not hex at all");
        let hello = serde_json::to_vec(&Message::event("connect", json!({}))).unwrap();
        socket.inject(encrypt_v1(&key, &hello).unwrap());
        assert!(inbox.recv().await.unwrap().is_hello());

        conn.send(Message::command("reboot", json!({ "delay": 5 }))).await.unwrap();
        let frame = socket.next_sent().await.unwrap();
        assert!(frame.chars().all(|c| c.is_ascii_hexdigit()));
        let out: Message = serde_json::from_slice(&decrypt_v1(&key, &frame).unwrap()).unwrap();
        assert_eq!(out.name, "reboot");
        assert_eq!(out.data["delay"], 5);

        conn.close(None).await;
    }
}
