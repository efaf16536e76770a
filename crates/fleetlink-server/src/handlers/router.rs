// ============================================
// File: crates/fleetlink-server/src/handlers/router.rs
// ============================================
//! # Message Router
//!
//! ## Creation Reason
//! Innermost pipeline stage. Device events leave the connection here
//! and enter the per-device event queue, where handlers process them in
//! order without blocking the connection's reader.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Only `event` messages of established devices are routed; replies
//!   and commands pass through to request matching
//! - The device id is read from the connection context on every
//!   message; the router keeps no connection reference

use async_trait::async_trait;
use fleetlink_core::protocol::{Envelope, MessageType, Payload};
use fleetlink_transport::{Capabilities, Connection, Middleware, Result};
use tracing::trace;

use crate::services::event_queue::{DeviceEvent, DeviceEventQueue};

/// Routes device events into the event queue.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    queue: DeviceEventQueue,
}

impl MessageRouter {
    /// Creates a router feeding `queue`.
    #[must_use]
    pub const fn new(queue: DeviceEventQueue) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Middleware for MessageRouter {
    fn name(&self) -> &'static str {
        "router"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none().with_incoming()
    }

    async fn incoming(&self, conn: &Connection, envelope: Envelope) -> Result<Option<Envelope>> {
        let Payload::Message(message) = &envelope.payload else {
            return Ok(Some(envelope));
        };
        if message.kind != MessageType::Event {
            return Ok(Some(envelope));
        }
        let Some(device_id) = conn.context().device_id() else {
            return Ok(Some(envelope));
        };

        trace!(device_id = %device_id, event_type = %message.name, "Routing event");
        let Payload::Message(message) = envelope.payload else {
            return Ok(None);
        };
        self.queue
            .add(DeviceEvent::new(device_id, message.name, message.data));
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fleetlink_common::DeviceId;
    use fleetlink_core::protocol::Message;
    use fleetlink_transport::{ConnectionOptions, JsonStage, MockSocket};
    use parking_lot::Mutex;
    use serde_json::json;

    #[tokio::test]
    async fn test_events_routed_replies_pass_through() {
        let queue = DeviceEventQueue::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        queue.register_handler("stats", move |event: DeviceEvent| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event);
                anyhow::Ok(())
            }
        });

        let socket = Arc::new(MockSocket::new());
        let conn = Connection::new(socket.clone(), ConnectionOptions::default());
        conn.use_stage(JsonStage::new());
        conn.use_stage(MessageRouter::new(queue));
        conn.context().set_device_id(DeviceId::new("dev1"));
        let mut inbox = conn.subscribe();
        {
            let conn = conn.clone();
            tokio::spawn(async move { conn.run().await });
        }

        socket.inject(serde_json::to_string(&Message::event("stats", json!({ "cpu": 3 }))).unwrap());
        socket.inject(serde_json::to_string(&Message::rpc("ping", json!({})).with_id("r1")).unwrap());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.device_id, DeviceId::new("dev1"));
        assert_eq!(event.event_type, "stats");
        assert_eq!(event.payload["cpu"], 3);

        let passed = inbox.recv().await.unwrap();
        assert_eq!(passed.id.as_deref(), Some("r1"));
        conn.close(None).await;
    }

    #[tokio::test]
    async fn test_events_without_device_pass_through() {
        let routed = Arc::new(Mutex::new(0));
        let queue = DeviceEventQueue::new();
        {
            let routed = routed.clone();
            queue.register_handler("stats", move |_event: DeviceEvent| {
                *routed.lock() += 1;
                async { anyhow::Ok(()) }
            });
        }

        let socket = Arc::new(MockSocket::new());
        let conn = Connection::new(socket.clone(), ConnectionOptions::default());
        conn.use_stage(JsonStage::new());
        conn.use_stage(MessageRouter::new(queue));
        let mut inbox = conn.subscribe();
        {
            let conn = conn.clone();
            tokio::spawn(async move { conn.run().await });
        }

        socket.inject(serde_json::to_string(&Message::event("stats", json!({}))).unwrap());
        assert_eq!(inbox.recv().await.unwrap().name, "stats");
        assert_eq!(*routed.lock(), 0);
        conn.close(None).await;
    }
}
