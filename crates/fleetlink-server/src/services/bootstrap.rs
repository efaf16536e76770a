// ============================================
// File: crates/fleetlink-server/src/services/bootstrap.rs
// ============================================
//! # Connection Bootstrap
//!
//! ## Creation Reason
//! Turns an anonymous, decrypted connection into a registered device
//! session once the device says hello.
//!
//! ## Main Functionality
//! ```text
//! hello ──► establish()
//!             ├─ resolve identity (DeviceDirectory)
//!             ├─ store.add (evicts a stale connection)
//!             ├─ scheduler: stop old actions, schedule keep-alive ping
//!             └─ load + push device settings
//! close ──► store.remove_if(device_id, conn) ──► scheduler.stop
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Establish runs on the connection's reader task. Never `request`
//!   or `command` from here: the reply could not be read.
//! - The stage holds the store weakly and the close hook reads only the
//!   device id from the context, so no store ↔ connection cycle exists
//! - Identity failures hold the socket open for
//!   `invalid_device_delay_secs` before closing it
//!
//! ## Last Modified
//! v0.1.0 - Initial bootstrap stage

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use fleetlink_common::DeviceId;
use fleetlink_core::protocol::{DeviceHello, Envelope, Message};
use fleetlink_transport::{Capabilities, Connection, ConnectionError, Middleware, Result};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::BootstrapConfig;
use crate::services::directory::DeviceDirectory;
use crate::services::scheduler::PeriodicScheduler;
use crate::services::settings::SettingsProvider;
use crate::services::store::DeviceStore;

/// RPC sent by the keep-alive action.
pub const PING_METHOD: &str = "ping";

/// Command carrying device settings.
pub const APPLY_SETTINGS_COMMAND: &str = "apply_settings";

// ============================================
// Bootstrap
// ============================================

/// Shared collaborators; produces one stage per connection.
#[derive(Clone)]
pub struct Bootstrap {
    store: Weak<DeviceStore>,
    scheduler: Arc<PeriodicScheduler>,
    directory: Arc<dyn DeviceDirectory>,
    settings: Arc<dyn SettingsProvider>,
    config: BootstrapConfig,
}

impl Bootstrap {
    /// Creates the bootstrap.
    #[must_use]
    pub fn new(
        store: &Arc<DeviceStore>,
        scheduler: Arc<PeriodicScheduler>,
        directory: Arc<dyn DeviceDirectory>,
        settings: Arc<dyn SettingsProvider>,
        config: BootstrapConfig,
    ) -> Self {
        Self {
            store: Arc::downgrade(store),
            scheduler,
            directory,
            settings,
            config,
        }
    }

    /// Creates the stage for a new connection.
    #[must_use]
    pub fn stage(&self) -> BootstrapStage {
        BootstrapStage {
            shared: self.clone(),
            hello_seen: AtomicBool::new(false),
        }
    }

    fn schedule_ping(&self, device_id: &DeviceId) {
        let store = self.store.clone();
        let id = device_id.clone();

        let scheduled = self.scheduler.schedule(device_id, &self.config.ping_interval, move || {
            let store = store.clone();
            let id = id.clone();
            async move {
                let Some(conn) = store.upgrade().and_then(|s| s.get(&id)) else {
                    return anyhow::Ok(());
                };
                conn.request(Message::rpc(PING_METHOD, json!({})), None).await?;
                Ok(())
            }
        });

        if let Err(e) = scheduled {
            debug!(device_id = %device_id, error = %e, "Keep-alive not scheduled");
        }
    }
}

impl std::fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrap")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================
// BootstrapStage
// ============================================

/// Per-connection bootstrap stage.
#[derive(Debug)]
pub struct BootstrapStage {
    shared: Bootstrap,
    hello_seen: AtomicBool,
}

#[async_trait]
impl Middleware for BootstrapStage {
    fn name(&self) -> &'static str {
        "bootstrap"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none().with_incoming().with_establish().with_close()
    }

    async fn incoming(&self, conn: &Connection, envelope: Envelope) -> Result<Option<Envelope>> {
        if conn.is_established() {
            return Ok(Some(envelope));
        }

        let Some(hello) = envelope.payload.as_message().and_then(DeviceHello::from_message) else {
            debug!(connection_id = %conn.id(), "Message before hello dropped");
            return Ok(None);
        };
        if self.hello_seen.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        conn.context().set_hello(hello);
        if let Err(error) = conn.establish().await {
            let delay = self.shared.config.invalid_device_delay();
            warn!(
                connection_id = %conn.id(),
                remote = ?conn.remote_addr(),
                error = %error,
                delay_secs = delay.as_secs(),
                "Bootstrap failed, closing after delay"
            );
            conn.close_after(delay);
        }
        Ok(None)
    }

    async fn on_establish(&self, conn: &Connection) -> Result<()> {
        let shared = &self.shared;
        let hello = conn.context().hello().unwrap_or_default();

        let device_id = shared
            .directory
            .resolve(&hello, conn.context().mac())
            .await
            .map_err(|e| ConnectionError::handshake(e.to_string()))?;
        conn.context().set_device_id(device_id.clone());

        let store = shared.store.upgrade().ok_or(ConnectionError::Closed)?;
        store.add(device_id.clone(), conn.clone()).await;

        shared.scheduler.stop(&device_id);
        shared.schedule_ping(&device_id);

        info!(
            device_id = %device_id,
            connection_id = %conn.id(),
            model = ?hello.model,
            firmware = ?hello.firmware,
            "Device online"
        );

        match shared.settings.load(&device_id).await {
            Ok(settings) => {
                if let Some(config) = settings.config {
                    conn.send(Message::command(APPLY_SETTINGS_COMMAND, config)).await?;
                    debug!(device_id = %device_id, "Settings applied");
                }
            }
            Err(e) => warn!(device_id = %device_id, error = %e, "Failed to load device settings"),
        }
        Ok(())
    }

    async fn on_close(&self, conn: &Connection, _reason: Option<&ConnectionError>) {
        let Some(device_id) = conn.context().device_id() else {
            return;
        };
        let Some(store) = self.shared.store.upgrade() else {
            return;
        };
        if store.remove_if(&device_id, conn) {
            self.shared.scheduler.stop(&device_id);
            info!(device_id = %device_id, connection_id = %conn.id(), "Device offline");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use fleetlink_transport::{ConnectionOptions, JsonStage, MockSocket};
    use tokio::time::Instant;

    use crate::config::{SchedulerConfig, ServerConfig};
    use crate::services::directory::MacDirectory;
    use crate::services::settings::ConfigSettings;

    struct Env {
        store: Arc<DeviceStore>,
        scheduler: Arc<PeriodicScheduler>,
        bootstrap: Bootstrap,
    }

    fn env() -> Env {
        let config = ServerConfig::from_str(
            r#"
            [devices.aabbccddeeff.settings]
            led = "off"
            "#,
        )
        .unwrap();
        let settings = Arc::new(ConfigSettings::from_config(&config));
        let store = Arc::new(DeviceStore::new());
        let scheduler = PeriodicScheduler::start(SchedulerConfig::default(), settings.clone());
        let bootstrap = Bootstrap::new(
            &store,
            scheduler.clone(),
            Arc::new(MacDirectory),
            settings,
            BootstrapConfig::default(),
        );
        Env {
            store,
            scheduler,
            bootstrap,
        }
    }

    fn connect(env: &Env) -> (Connection, Arc<MockSocket>) {
        let socket = Arc::new(MockSocket::new());
        let conn = Connection::new(socket.clone(), ConnectionOptions::default());
        conn.use_stage(JsonStage::new());
        conn.use_stage(env.bootstrap.stage());
        {
            let conn = conn.clone();
            tokio::spawn(async move { conn.run().await });
        }
        (conn, socket)
    }

    fn hello(mac: Option<&str>) -> String {
        let data = match mac {
            Some(mac) => json!({ "mac": mac, "model": "ONU-X" }),
            None => json!({ "model": "ONU-X" }),
        };
        serde_json::to_string(&Message::event("connect", data)).unwrap()
    }

    async fn wait_established(conn: &Connection) {
        while !conn.is_established() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_hello_registers_device() {
        let env = env();
        let (conn, socket) = connect(&env);

        socket.inject(hello(Some("aa:bb:cc:dd:ee:ff")));
        wait_established(&conn).await;

        let id = DeviceId::new("aabbccddeeff");
        assert_eq!(conn.context().device_id(), Some(id.clone()));
        assert!(env.store.get(&id).unwrap().ptr_eq(&conn));
        assert_eq!(env.scheduler.action_count(), 1);

        // Settings push and the first keep-alive, in either order
        let mut names = Vec::new();
        for _ in 0..2 {
            let frame = socket.next_sent().await.unwrap();
            let msg: Message = serde_json::from_str(&frame).unwrap();
            names.push(msg.name);
        }
        names.sort();
        assert_eq!(names, vec![APPLY_SETTINGS_COMMAND, PING_METHOD]);

        env.scheduler.destroy();
        conn.close(None).await;
    }

    #[tokio::test]
    async fn test_close_unregisters_device() {
        let env = env();
        let (conn, socket) = connect(&env);
        socket.inject(hello(Some("11:22:33:44:55:66")));
        wait_established(&conn).await;

        socket.disconnect();
        conn.closed().await;

        assert_eq!(env.store.count(), 0);
        assert_eq!(env.scheduler.action_count(), 0);
        env.scheduler.destroy();
    }

    #[tokio::test]
    async fn test_reconnect_evicts_previous_connection() {
        let env = env();
        let (old, old_socket) = connect(&env);
        old_socket.inject(hello(Some("11:22:33:44:55:66")));
        wait_established(&old).await;

        let (new, new_socket) = connect(&env);
        new_socket.inject(hello(Some("11:22:33:44:55:66")));
        wait_established(&new).await;
        old.closed().await;

        let id = DeviceId::new("112233445566");
        assert!(env.store.get(&id).unwrap().ptr_eq(&new));
        assert_eq!(env.store.count(), 1);
        assert_eq!(env.scheduler.action_count(), 1);

        env.scheduler.destroy();
        new.close(None).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_device_held_then_closed() {
        let env = env();
        let (conn, socket) = connect(&env);
        let started = Instant::now();

        socket.inject(hello(None));
        tokio::time::sleep(Duration::from_secs(19)).await;
        assert!(!conn.is_closed());
        assert!(!conn.is_established());
        assert_eq!(env.store.count(), 0);

        conn.closed().await;
        assert!(started.elapsed() >= Duration::from_secs(20));
        env.scheduler.destroy();
    }

    #[tokio::test]
    async fn test_messages_before_hello_are_dropped() {
        let env = env();
        let (conn, socket) = connect(&env);
        let mut inbox = conn.subscribe();

        socket.inject(serde_json::to_string(&Message::event("stats", json!({}))).unwrap());
        socket.inject(hello(Some("11:22:33:44:55:66")));
        wait_established(&conn).await;
        socket.inject(serde_json::to_string(&Message::event("stats", json!({ "n": 2 }))).unwrap());

        let msg = inbox.recv().await.unwrap();
        assert_eq!(msg.data["n"], 2);

        env.scheduler.destroy();
        conn.close(None).await;
    }
}
