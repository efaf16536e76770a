// ============================================
// File: crates/fleetlink-server/src/server.rs
// ============================================
//! # Server Orchestrator
//!
//! ## Creation Reason
//! Wires the long-lived components together, accepts device sockets and
//! manages the server lifecycle.
//!
//! ## Main Functionality
//! - `Services`: Shared components plus the per-connection pipeline factory
//! - `DeviceSession`: A freshly attached connection and its handshake watchdog
//! - `Server`: Accept loop and graceful shutdown
//!
//! ## Server Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Server                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TCP accept ──► Guard.verify_client ──503──► reject         │
//! │                      │ ok                                   │
//! │                      ▼                                      │
//! │  WebSocket upgrade (protocol header) ──► Connection         │
//! │                                                             │
//! │  Pipeline per connection (incoming order):                  │
//! │    codec v1|v2 ─► json ─► bootstrap ─► router               │
//! │                                                             │
//! │  ┌──────────┐ ┌───────────┐ ┌────────────┐ ┌─────────────┐ │
//! │  │  Guard   │ │  Store    │ │ Scheduler  │ │ Event Queue │ │
//! │  └──────────┘ └───────────┘ └────────────┘ └─────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `Services::new` spawns the scheduler; call it inside a runtime
//! - Connections without a negotiated protocol get no stages and are
//!   closed by the handshake watchdog
//! - A v2 connection holding for key pickup is exempt from the watchdog
//!
//! ## Last Modified
//! v0.1.0 - Initial server implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleetlink_core::{MasterSecret, ProtocolVersion};
use fleetlink_transport::{
    Connection, ConnectionError, ConnectionOptions, JsonStage, WireSocket, WsSocket,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::codec::{CodecV1Stage, CodecV2Stage, DeviceKeyRepository, MemoryKeyStore};
use crate::config::{RpcConfig, ServerConfig};
use crate::error::{Result, ServerError};
use crate::handlers::MessageRouter;
use crate::services::{
    Bootstrap, ConfigSettings, DeviceEventQueue, DeviceStore, Guard, MacDirectory,
    PeriodicScheduler,
};

const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================
// Services
// ============================================

/// Long-lived components shared by every connection.
pub struct Services {
    master: MasterSecret,
    rpc: RpcConfig,
    bootstrap: Bootstrap,
    /// Admission control.
    pub guard: Arc<Guard>,
    /// Registered device connections.
    pub store: Arc<DeviceStore>,
    /// Periodic device actions.
    pub scheduler: Arc<PeriodicScheduler>,
    /// Per-device event processing.
    pub events: DeviceEventQueue,
    /// Device key persistence.
    pub keys: Arc<dyn DeviceKeyRepository>,
    /// Intervals and device settings.
    pub settings: Arc<ConfigSettings>,
}

impl Services {
    /// Creates all components from the config.
    #[must_use]
    pub fn new(config: &ServerConfig, master: MasterSecret, keys: Arc<dyn DeviceKeyRepository>) -> Self {
        let settings = Arc::new(ConfigSettings::from_config(config));
        let store = Arc::new(DeviceStore::new());
        let scheduler = PeriodicScheduler::start(config.scheduler.clone(), settings.clone());
        let bootstrap = Bootstrap::new(
            &store,
            scheduler.clone(),
            Arc::new(MacDirectory),
            settings.clone(),
            config.bootstrap.clone(),
        );

        Self {
            master,
            rpc: config.rpc.clone(),
            bootstrap,
            guard: Arc::new(Guard::new(config.guard.clone())),
            store,
            scheduler,
            events: DeviceEventQueue::new(),
            keys,
            settings,
        }
    }

    /// Creates a connection over `socket` with the pipeline for
    /// `protocol`.
    #[must_use]
    pub fn open_connection(
        &self,
        socket: Arc<dyn WireSocket>,
        protocol: Option<ProtocolVersion>,
    ) -> DeviceSession {
        let connection = Connection::new(
            socket,
            ConnectionOptions {
                protocol,
                request_timeout: self.rpc.request_timeout(),
            },
        );

        let codec_v2 = match protocol {
            None => {
                debug!(connection_id = %connection.id(), "No protocol negotiated, connection is inert");
                return DeviceSession {
                    connection,
                    codec_v2: None,
                };
            }
            Some(ProtocolVersion::V1) => {
                connection.use_stage(CodecV1Stage::new(&self.master));
                None
            }
            Some(ProtocolVersion::V2) => {
                let stage = Arc::new(CodecV2Stage::new(&self.master, Arc::clone(&self.keys)));
                connection.use_shared(stage.clone());
                Some(stage)
            }
        };

        connection.use_stage(JsonStage::new());
        connection.use_stage(self.bootstrap.stage());
        connection.use_stage(MessageRouter::new(self.events.clone()));

        DeviceSession { connection, codec_v2 }
    }

    /// Stops background work and closes every registered device.
    pub async fn shutdown(&self) {
        self.scheduler.destroy();
        self.guard.shutdown();
        self.store.close_all().await;
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("devices", &self.store.count())
            .field("actions", &self.scheduler.action_count())
            .field("guard", &self.guard.status())
            .finish_non_exhaustive()
    }
}

// ============================================
// DeviceSession
// ============================================

/// A connection attached to the server pipeline.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    /// The connection.
    pub connection: Connection,
    codec_v2: Option<Arc<CodecV2Stage>>,
}

impl DeviceSession {
    /// Returns `true` while a v2 connection waits for key pickup.
    #[must_use]
    pub fn is_holding(&self) -> bool {
        self.codec_v2.as_ref().is_some_and(|stage| stage.is_holding())
    }

    /// Closes the connection if no hello established it within `timeout`.
    pub fn watch_handshake(&self, timeout: Duration) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            let conn = &session.connection;
            tokio::select! {
                () = tokio::time::sleep(timeout) => {}
                () = conn.closed() => return,
            }
            if conn.is_established() || conn.is_closed() || session.is_holding() {
                return;
            }
            warn!(
                connection_id = %conn.id(),
                remote = ?conn.remote_addr(),
                ?timeout,
                "No device hello within handshake timeout"
            );
            conn.close(Some(&ConnectionError::handshake("hello timed out"))).await;
        })
    }
}

// ============================================
// Server
// ============================================

/// Device communication server.
///
/// # Lifecycle
/// 1. Create with `Server::new(config, master)` inside a runtime
/// 2. Start with `server.run().await` (or `serve` on a bound listener)
/// 3. Shutdown via `shutdown()` or Ctrl+C
pub struct Server {
    /// Server configuration.
    config: ServerConfig,
    /// Shared components.
    services: Arc<Services>,
    /// Shutdown flag.
    shutdown: Arc<AtomicBool>,
    /// Shutdown signal sender.
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Creates a server with an in-memory key store.
    #[must_use]
    pub fn new(config: ServerConfig, master: MasterSecret) -> Self {
        Self::with_key_store(config, master, Arc::new(MemoryKeyStore::new()))
    }

    /// Creates a server backed by the given key repository.
    #[must_use]
    pub fn with_key_store(
        config: ServerConfig,
        master: MasterSecret,
        keys: Arc<dyn DeviceKeyRepository>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let services = Arc::new(Services::new(&config, master, keys));
        Self {
            config,
            services,
            shutdown: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Returns the shared components, e.g. to register event handlers.
    #[must_use]
    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Binds the configured address and serves until shutdown.
    ///
    /// # Errors
    /// `StartupFailed` if the address cannot be bound.
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::startup_failed(format!("bind {addr} failed: {e}")))?;
        self.serve(listener).await
    }

    /// Serves device connections on `listener` until shutdown.
    ///
    /// # Errors
    /// Currently always returns `Ok` once shut down.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(
            "Starting FleetLink server v{} on {:?}",
            env!("CARGO_PKG_VERSION"),
            listener.local_addr().ok()
        );

        let sampler = self.services.guard.start();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        if !self.shutdown.load(Ordering::SeqCst) {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    () = wait_for_ctrl_c() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => self.spawn_socket_task(stream, peer),
                        Err(e) => warn!(error = %e, "Accept failed"),
                    },
                }
            }
        }

        info!("Shutting down server...");
        self.shutdown();
        self.services.shutdown().await;

        if let Some(sampler) = sampler {
            match tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, sampler).await {
                Ok(Ok(())) => debug!("Guard sampler completed"),
                Ok(Err(e)) => warn!("Guard sampler failed: {}", e),
                Err(_) => warn!("Guard sampler timed out during shutdown"),
            }
        }

        info!("Server shutdown complete");
        Ok(())
    }

    /// Spawns the task owning one device socket.
    fn spawn_socket_task(&self, stream: TcpStream, peer: SocketAddr) {
        let services = Arc::clone(&self.services);
        let header = self.config.network.protocol_header.clone();
        let handshake_timeout = self.config.rpc.handshake_timeout();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if let Err(error) = services.guard.verify_client().await {
                reject(stream, peer, &error).await;
                return;
            }

            let mut protocol_value = None;
            let callback = |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
                protocol_value = request
                    .headers()
                    .get(header.as_str())
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(response)
            };

            let ws = match tokio::time::timeout(handshake_timeout, accept_hdr_async(stream, callback)).await {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    debug!(remote = %peer, error = %e, "WebSocket upgrade failed");
                    return;
                }
                Err(_) => {
                    debug!(remote = %peer, "WebSocket upgrade timed out");
                    return;
                }
            };

            let protocol = ProtocolVersion::negotiate(protocol_value.as_deref());
            let session = services.open_connection(Arc::new(WsSocket::new(ws, Some(peer))), protocol);
            let conn = session.connection.clone();
            info!(
                connection_id = %conn.id(),
                remote = %peer,
                protocol = ?protocol,
                "Device socket accepted"
            );
            session.watch_handshake(handshake_timeout);

            tokio::select! {
                result = conn.run() => {
                    if let Err(e) = result {
                        debug!(connection_id = %conn.id(), error = %e, "Connection ended with error");
                    }
                }
                _ = shutdown_rx.recv() => conn.close(None).await,
            }
        });
    }

    /// Triggers server shutdown programmatically.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listen_addr", &self.config.network.listen_addr)
            .field("protocol_header", &self.config.network.protocol_header)
            .finish_non_exhaustive()
    }
}

/// Answers the upgrade with 503 once the guard's delay has passed.
async fn reject(stream: TcpStream, peer: SocketAddr, error: &ServerError) {
    let reason = error.to_string();
    let callback = move |_request: &Request, _response: Response| -> std::result::Result<Response, ErrorResponse> {
        let mut response = ErrorResponse::new(Some(reason));
        *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
        Err(response)
    };
    let _ = accept_hdr_async(stream, callback).await;
    debug!(remote = %peer, "Client rejected");
}

/// Resolves on Ctrl+C; never resolves if the signal cannot be installed.
async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use fleetlink_transport::MockSocket;

    fn services() -> Services {
        Services::new(
            &ServerConfig::default(),
            MasterSecret::generate(),
            Arc::new(MemoryKeyStore::new()),
        )
    }

    #[tokio::test]
    async fn test_inert_connection_without_protocol() {
        let services = services();
        let socket = Arc::new(MockSocket::new());
        let session = services.open_connection(socket.clone(), None);
        let mut inbox = session.connection.subscribe();

        let reader = {
            let conn = session.connection.clone();
            tokio::spawn(async move { conn.run().await })
        };
        socket.inject(r#"{"type":"event","name":"connect","data":{"mac":"aa:bb:cc:dd:ee:ff"}}"#);
        socket.disconnect();
        reader.await.unwrap().unwrap();

        assert!(inbox.try_recv().is_err());
        assert!(!session.connection.is_established());
        assert_eq!(session.connection.protocol(), None);
        services.scheduler.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_watchdog_closes_silent_connection() {
        let services = services();
        let session = services.open_connection(Arc::new(MockSocket::new()), Some(ProtocolVersion::V1));

        session.watch_handshake(Duration::from_secs(30)).await.unwrap();
        assert!(session.connection.is_closed());
        services.scheduler.destroy();
    }

    #[tokio::test]
    async fn test_shutdown_before_serve_returns() {
        let server = Server::new(ServerConfig::default(), MasterSecret::generate());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        server.shutdown();
        server.serve(listener).await.unwrap();
        assert!(server.services().scheduler.is_destroyed());
    }
}
