// ============================================
// File: crates/fleetlink-transport/src/connection.rs
// ============================================
//! # Device Connection
//!
//! ## Creation Reason
//! Owns one physical socket and runs its middleware pipelines. Every
//! higher layer (codec, bootstrap, routing, polling) talks to a device
//! through this type.
//!
//! ## Main Functionality
//! - `use_stage`: Register a middleware stage
//! - `send` / `send_envelope`: Outgoing pipeline, then socket write
//! - `request`: Send and await the reply with the same id
//! - `command`: Like `request`, one outstanding at a time
//! - `establish`: Run establish hooks once the device said hello
//! - `close`: Idempotent shutdown, close hooks in reverse order
//! - `run`: Reader loop, one frame at a time
//!
//! ## Main Logical Flow
//! ```text
//!  socket.recv() ──► incoming stages ──► id matches pending request?
//!        ▲                │                 ├─ yes: complete request
//!        │            error hooks           └─ no:  subscribers
//!        │                │
//!   (sequential)     unhandled ──► close
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Incoming frames are processed strictly one at a time; codec state
//!   depends on it
//! - `Connection` is a cheap handle; clone it, do not wrap it in `Arc`
//! - Stages are dropped on close so that stage-held handles cannot keep
//!   the connection alive
//! - Never hold a `parking_lot` guard across `.await`
//!
//! ## Last Modified
//! v0.1.0 - Initial connection implementation

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use fleetlink_common::time::{unix_timestamp_millis, AtomicInstant};
use fleetlink_common::{ConnectionId, DeviceId, MacAddress};
use fleetlink_core::protocol::{
    generate_message_id, Codec, DeviceHello, Envelope, JsonCodec, Message, Payload,
    ProtocolVersion,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{ConnectionError, Result};
use crate::middleware::Middleware;
use crate::traits::WireSocket;

// ============================================
// Constants
// ============================================

/// Default timeout for `request` and `command`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Buffered unmatched messages per subscriber.
const SUBSCRIBER_CAPACITY: usize = 64;

// ============================================
// ConnectionState
// ============================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepting traffic.
    Open,
    /// `close` has started; close hooks are running.
    Closing,
    /// Fully closed.
    Closed,
}

async fn wait_closing(rx: &mut watch::Receiver<ConnectionState>) {
    // A dropped sender means the connection is gone.
    let _ = rx.wait_for(|s| *s != ConnectionState::Open).await;
}

// ============================================
// ConnectionOptions
// ============================================

/// Construction options.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Negotiated codec, `None` for an inert connection.
    pub protocol: Option<ProtocolVersion>,
    /// Default timeout for `request` and `command`.
    pub request_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            protocol: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// ============================================
// ConnectionContext
// ============================================

#[derive(Debug, Default)]
struct ContextData {
    mac: Option<MacAddress>,
    device_id: Option<DeviceId>,
    hello: Option<DeviceHello>,
}

/// Facts about the peer learned by stages during the session.
#[derive(Debug)]
pub struct ConnectionContext {
    data: RwLock<ContextData>,
    connected_at: u64,
}

impl ConnectionContext {
    fn new() -> Self {
        Self {
            data: RwLock::new(ContextData::default()),
            connected_at: unix_timestamp_millis(),
        }
    }

    /// MAC learned from the first v2 frame.
    #[must_use]
    pub fn mac(&self) -> Option<MacAddress> {
        self.data.read().mac
    }

    /// Records the device MAC.
    pub fn set_mac(&self, mac: MacAddress) {
        self.data.write().mac = Some(mac);
    }

    /// Resolved device identity, once bootstrapped.
    #[must_use]
    pub fn device_id(&self) -> Option<DeviceId> {
        self.data.read().device_id.clone()
    }

    /// Records the resolved device identity.
    pub fn set_device_id(&self, id: DeviceId) {
        self.data.write().device_id = Some(id);
    }

    /// The device hello, once received.
    #[must_use]
    pub fn hello(&self) -> Option<DeviceHello> {
        self.data.read().hello.clone()
    }

    /// Records the device hello.
    pub fn set_hello(&self, hello: DeviceHello) {
        self.data.write().hello = Some(hello);
    }

    /// Accept time in Unix milliseconds.
    #[must_use]
    pub const fn connected_at(&self) -> u64 {
        self.connected_at
    }
}

// ============================================
// Pipelines
// ============================================

type Stage = Arc<dyn Middleware>;

/// Ordered hook lists.
///
/// Incoming and establish hooks are appended; outgoing, close and
/// error hooks are prepended. Outgoing therefore always mirrors
/// incoming.
#[derive(Default)]
struct Pipelines {
    incoming: Vec<Stage>,
    outgoing: Vec<Stage>,
    establish: Vec<Stage>,
    close: Vec<Stage>,
    error: Vec<Stage>,
}

impl Pipelines {
    fn register(&mut self, stage: &Stage) {
        let caps = stage.capabilities();
        if caps.incoming {
            self.incoming.push(stage.clone());
        }
        if caps.outgoing {
            self.outgoing.insert(0, stage.clone());
        }
        if caps.establish {
            self.establish.push(stage.clone());
        }
        if caps.close {
            self.close.insert(0, stage.clone());
        }
        if caps.error {
            self.error.insert(0, stage.clone());
        }
    }
}

// ============================================
// Pending requests
// ============================================

type PendingMap = Mutex<HashMap<String, oneshot::Sender<Message>>>;

/// Removes a pending request on every exit path, including cancellation.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

// ============================================
// Connection
// ============================================

struct Inner {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    protocol: Option<ProtocolVersion>,
    request_timeout: Duration,
    socket: Arc<dyn WireSocket>,
    pipelines: RwLock<Pipelines>,
    pending: PendingMap,
    unmatched: Mutex<Option<broadcast::Sender<Message>>>,
    commands: tokio::sync::Mutex<()>,
    state: watch::Sender<ConnectionState>,
    established: AtomicBool,
    last_activity: AtomicInstant,
    context: ConnectionContext,
}

/// Handle to one device connection.
///
/// # Example
/// ```ignore
/// let conn = Connection::new(socket, ConnectionOptions::default());
/// conn.use_stage(CodecV2Stage::new(...));
/// conn.use_stage(JsonStage::new());
/// tokio::spawn({ let c = conn.clone(); async move { c.run().await } });
///
/// let reply = conn.request(Message::rpc("get_stats", json!({})), None).await?;
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Creates a connection over a socket.
    #[must_use]
    pub fn new(socket: Arc<dyn WireSocket>, options: ConnectionOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Open);
        let (unmatched, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        let id = ConnectionId::generate();

        debug!(
            connection_id = %id,
            remote = ?socket.remote_addr(),
            protocol = ?options.protocol,
            "Connection created"
        );

        Self {
            inner: Arc::new(Inner {
                id,
                remote_addr: socket.remote_addr(),
                protocol: options.protocol,
                request_timeout: options.request_timeout,
                socket,
                pipelines: RwLock::new(Pipelines::default()),
                pending: Mutex::new(HashMap::new()),
                unmatched: Mutex::new(Some(unmatched)),
                commands: tokio::sync::Mutex::new(()),
                state,
                established: AtomicBool::new(false),
                last_activity: AtomicInstant::now(),
                context: ConnectionContext::new(),
            }),
        }
    }

    // ========================================
    // Accessors
    // ========================================

    /// Returns the connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Returns the peer address.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// Returns the negotiated codec.
    #[must_use]
    pub fn protocol(&self) -> Option<ProtocolVersion> {
        self.inner.protocol
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Returns `true` once `close` has started.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() != ConnectionState::Open
    }

    /// Returns `true` once `establish` completed.
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.inner.established.load(Ordering::Acquire)
    }

    /// Returns the time of the last inbound frame.
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.inner.last_activity.load()
    }

    /// Returns the per-connection context.
    #[must_use]
    pub fn context(&self) -> &ConnectionContext {
        &self.inner.context
    }

    /// Returns a weak handle that does not keep the connection alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns `true` if both handles refer to the same connection.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ========================================
    // Pipeline registration
    // ========================================

    /// Registers a middleware stage.
    pub fn use_stage<M: Middleware>(&self, stage: M) {
        self.use_shared(Arc::new(stage));
    }

    /// Registers a shared middleware stage.
    pub fn use_shared(&self, stage: Arc<dyn Middleware>) {
        trace!(connection_id = %self.inner.id, stage = stage.name(), "Stage registered");
        self.inner.pipelines.write().register(&stage);
    }

    // ========================================
    // Outgoing
    // ========================================

    /// Sends a message through the outgoing pipeline.
    ///
    /// # Errors
    /// - `Closed` if the connection is closed
    /// - Any error raised by an outgoing stage or the socket
    pub async fn send(&self, message: Message) -> Result<()> {
        self.send_envelope(Envelope::message(message)).await
    }

    /// Sends an envelope (message plus metadata) through the pipeline.
    ///
    /// Completes when the socket write finishes or the connection
    /// closes first.
    ///
    /// # Errors
    /// See [`Connection::send`].
    pub async fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        let stages = self.inner.pipelines.read().outgoing.clone();
        let mut envelope = envelope;
        for stage in &stages {
            match stage.outgoing(self, envelope).await? {
                Some(next) => envelope = next,
                None => {
                    trace!(connection_id = %self.inner.id, stage = stage.name(), "Outgoing message dropped");
                    return Ok(());
                }
            }
        }

        let frame = match envelope.payload {
            Payload::Text(text) => text,
            Payload::Message(message) => JsonCodec::new().encode(&message)?,
        };

        let mut state = self.inner.state.subscribe();
        tokio::select! {
            result = self.inner.socket.send(frame) => result,
            () = wait_closing(&mut state) => {
                debug!(connection_id = %self.inner.id, "Connection closed during send");
                Ok(())
            }
        }
    }

    /// Sends a message and waits for the reply carrying the same id.
    ///
    /// An id is generated if the message has none. The connection stays
    /// open on timeout or error replies.
    ///
    /// # Errors
    /// - `RpcTimeout` if no reply arrives within `timeout`
    ///   (default 15s)
    /// - `Rpc` if the reply carries a non-null error
    /// - `Closed` if the connection closes first
    pub async fn request(&self, mut message: Message, timeout: Option<Duration>) -> Result<Message> {
        let timeout = timeout.unwrap_or(self.inner.request_timeout);
        let id = message.id.get_or_insert_with(generate_message_id).clone();

        let (tx, rx) = oneshot::channel();
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.inner.pending.lock().insert(id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            id: id.clone(),
        };

        self.send(message).await?;

        let mut state = self.inner.state.subscribe();
        let reply = tokio::select! {
            reply = tokio::time::timeout(timeout, rx) => reply,
            () = wait_closing(&mut state) => return Err(ConnectionError::Closed),
        };

        match reply {
            Err(_) => {
                debug!(connection_id = %self.inner.id, request_id = %id, ?timeout, "Request timed out");
                Err(ConnectionError::RpcTimeout { id, timeout })
            }
            Ok(Err(_)) => Err(ConnectionError::Closed),
            Ok(Ok(reply)) if reply.is_error() => Err(ConnectionError::Rpc {
                id,
                message: reply.error_message().unwrap_or_default(),
            }),
            Ok(Ok(reply)) => Ok(reply),
        }
    }

    /// Like [`Connection::request`], but serialized: only one command is
    /// outstanding per connection. Queued commands run in call order.
    ///
    /// Dropping the returned future removes only this command from the
    /// queue. The timeout starts once the command is actually sent.
    ///
    /// # Errors
    /// See [`Connection::request`].
    pub async fn command(&self, message: Message, timeout: Option<Duration>) -> Result<Message> {
        let _turn = self.inner.commands.lock().await;
        self.request(message, timeout).await
    }

    /// Subscribes to incoming messages not matched to a request.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        match self.inner.unmatched.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Runs all establish hooks in registration order.
    ///
    /// A hook error that is not fatal is routed to the error hooks and
    /// the remaining hooks still run.
    ///
    /// # Errors
    /// - `Closed` if the connection is closed
    /// - The first fatal hook error
    pub async fn establish(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        let hooks = self.inner.pipelines.read().establish.clone();
        for hook in &hooks {
            if let Err(error) = hook.on_establish(self).await {
                if error.is_fatal() {
                    warn!(
                        connection_id = %self.inner.id,
                        stage = hook.name(),
                        error = %error,
                        "Establish hook failed"
                    );
                    return Err(error);
                }
                if let Some(error) = self.route_error(error).await {
                    warn!(
                        connection_id = %self.inner.id,
                        stage = hook.name(),
                        error = %error,
                        "Establish hook error unhandled"
                    );
                }
            }
        }

        self.inner.established.store(true, Ordering::Release);
        info!(
            connection_id = %self.inner.id,
            device_id = ?self.inner.context.device_id(),
            "Connection established"
        );
        Ok(())
    }

    /// Closes the connection. Idempotent.
    ///
    /// The first call closes the socket, runs close hooks (reverse
    /// registration order), fails pending requests and drops all stages.
    /// Later calls return immediately; use [`Connection::closed`] to wait
    /// for completion.
    pub async fn close(&self, reason: Option<&ConnectionError>) {
        let first = self.inner.state.send_if_modified(|s| {
            if *s == ConnectionState::Open {
                *s = ConnectionState::Closing;
                true
            } else {
                false
            }
        });
        if !first {
            return;
        }

        if let Err(e) = self.inner.socket.close().await {
            debug!(connection_id = %self.inner.id, error = %e, "Socket close failed");
        }

        let hooks = self.inner.pipelines.read().close.clone();
        for hook in &hooks {
            hook.on_close(self, reason).await;
        }
        drop(hooks);

        self.inner.pending.lock().clear();
        self.inner.unmatched.lock().take();
        *self.inner.pipelines.write() = Pipelines::default();
        self.inner.state.send_replace(ConnectionState::Closed);

        match reason {
            Some(error) => info!(connection_id = %self.inner.id, error = %error, "Connection closed"),
            None => info!(connection_id = %self.inner.id, "Connection closed"),
        }
    }

    /// Waits until the connection is fully closed.
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Closes the connection after `delay`, unless it closes sooner.
    pub fn close_after(&self, delay: Duration) -> JoinHandle<()> {
        let conn = self.clone();
        tokio::spawn(async move {
            let mut state = conn.inner.state.subscribe();
            tokio::select! {
                () = tokio::time::sleep(delay) => conn.close(None).await,
                () = wait_closing(&mut state) => {}
            }
        })
    }

    // ========================================
    // Incoming
    // ========================================

    /// Reads and processes frames until the connection closes.
    ///
    /// Frames are processed one at a time. A peer disconnect closes the
    /// connection cleanly.
    ///
    /// # Errors
    /// Returns the error that closed the connection if no error hook
    /// handled it.
    pub async fn run(&self) -> Result<()> {
        let mut state = self.inner.state.subscribe();
        loop {
            let frame = tokio::select! {
                biased;
                () = wait_closing(&mut state) => return Ok(()),
                frame = self.inner.socket.recv() => frame,
            };

            match frame {
                Ok(Some(text)) => {
                    self.inner.last_activity.touch();
                    if let Some(error) = self.dispatch(Envelope::text(text)).await {
                        warn!(connection_id = %self.inner.id, error = %error, "Unhandled pipeline error");
                        self.close(Some(&error)).await;
                        return Err(error);
                    }
                }
                Ok(None) => {
                    debug!(connection_id = %self.inner.id, "Peer closed socket");
                    self.close(None).await;
                    return Ok(());
                }
                Err(error) => {
                    let unhandled = self.route_error(error).await;
                    self.close(unhandled.as_ref()).await;
                    return unhandled.map_or(Ok(()), Err);
                }
            }
        }
    }

    async fn dispatch(&self, envelope: Envelope) -> Option<ConnectionError> {
        let stages = self.inner.pipelines.read().incoming.clone();
        let mut envelope = envelope;
        for stage in &stages {
            match stage.incoming(self, envelope).await {
                Ok(Some(next)) => envelope = next,
                Ok(None) => return None,
                Err(error) => return self.route_error(error).await,
            }
        }
        self.deliver(envelope);
        None
    }

    fn deliver(&self, envelope: Envelope) {
        let Payload::Message(message) = envelope.payload else {
            trace!(connection_id = %self.inner.id, "Dropping unparsed frame");
            return;
        };

        if let Some(id) = &message.id {
            let waiter = self.inner.pending.lock().remove(id);
            if let Some(tx) = waiter {
                let _ = tx.send(message);
                return;
            }
        }

        if let Some(tx) = self.inner.unmatched.lock().as_ref() {
            // No subscribers is fine
            let _ = tx.send(message);
        }
    }

    /// Passes an error through the error hooks, innermost first.
    ///
    /// Returns `None` if a hook swallowed it.
    async fn route_error(&self, error: ConnectionError) -> Option<ConnectionError> {
        let hooks = self.inner.pipelines.read().error.clone();
        let mut current = error;
        for hook in &hooks {
            match hook.on_error(self, current).await {
                Some(next) => current = next,
                None => return None,
            }
        }
        Some(current)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("protocol", &self.inner.protocol)
            .field("state", &self.state())
            .field("device_id", &self.inner.context.device_id())
            .finish_non_exhaustive()
    }
}

// ============================================
// WeakConnection
// ============================================

/// Weak handle to a connection.
#[derive(Clone)]
pub struct WeakConnection {
    inner: Weak<Inner>,
}

impl WeakConnection {
    /// Upgrades to a strong handle if the connection still exists.
    #[must_use]
    pub fn upgrade(&self) -> Option<Connection> {
        self.inner.upgrade().map(|inner| Connection { inner })
    }
}

impl fmt::Debug for WeakConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakConnection")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

// ============================================
// Tests
// ============================================
