// ============================================
// File: crates/fleetlink-transport/src/mock.rs
// ============================================
//! # Mock Socket Implementation
//!
//! ## Creation Reason
//! Provides an in-memory socket for testing connections, codecs and the
//! bootstrap flow without a network.
//!
//! ## Main Functionality
//! - Inject frames as if the device had sent them
//! - Capture frames the connection wrote
//! - Simulate a device-side disconnect
//! - Fail a read with a socket error
//!
//! ## Usage in Tests
//! ```
//! use fleetlink_transport::mock::MockSocket;
//! use fleetlink_transport::traits::WireSocket;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let socket = MockSocket::new();
//! socket.inject("hello");
//! assert_eq!(socket.recv().await.unwrap().as_deref(), Some("hello"));
//!
//! socket.send("world".into()).await.unwrap();
//! assert_eq!(socket.take_sent(), vec!["world".to_string()]);
//! # }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This is for testing only - do not use in production
//! - Queues are bounded to catch runaway loops in tests
//!
//! ## Last Modified
//! v0.1.0 - Initial mock implementation

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{ConnectionError, Result};
use crate::traits::WireSocket;

// ============================================
// Constants
// ============================================

/// Maximum number of frames to queue in either direction.
const MAX_QUEUE_SIZE: usize = 1000;

// ============================================
// MockSocket
// ============================================

/// In-memory socket for testing.
pub struct MockSocket {
    /// Peer address reported by `remote_addr`
    remote: Option<SocketAddr>,
    /// Frames or read errors waiting to be received (injected by tests)
    inbound: Mutex<VecDeque<Result<String>>>,
    /// Frames written by the connection
    outbound: Mutex<VecDeque<String>>,
    /// Set by `disconnect` (peer side) or `close` (our side)
    closed: AtomicBool,
    /// Wakes the reader
    inbound_notify: Notify,
    /// Wakes tests waiting for outbound frames
    outbound_notify: Notify,
}

impl MockSocket {
    /// Creates a new mock socket.
    #[must_use]
    pub fn new() -> Self {
        Self::with_remote(None)
    }

    /// Creates a new mock socket reporting the given peer address.
    #[must_use]
    pub fn with_remote(remote: Option<SocketAddr>) -> Self {
        Self {
            remote,
            inbound: Mutex::new(VecDeque::with_capacity(16)),
            outbound: Mutex::new(VecDeque::with_capacity(16)),
            closed: AtomicBool::new(false),
            inbound_notify: Notify::new(),
            outbound_notify: Notify::new(),
        }
    }

    /// Injects a frame to be returned by the next `recv()` call.
    ///
    /// # Panics
    /// Panics if the queue is full (> MAX_QUEUE_SIZE frames).
    pub fn inject(&self, frame: impl Into<String>) {
        let mut queue = self.inbound.lock();
        assert!(queue.len() < MAX_QUEUE_SIZE, "Mock socket inbound queue overflow");
        queue.push_back(Ok(frame.into()));
        drop(queue);
        self.inbound_notify.notify_one();
    }

    /// Makes a later `recv()` fail with `error`, after any frames
    /// injected before it.
    pub fn fail(&self, error: ConnectionError) {
        self.inbound.lock().push_back(Err(error));
        self.inbound_notify.notify_one();
    }

    /// Simulates the peer closing the socket.
    pub fn disconnect(&self) {
        self.closed.store(true, Ordering::Release);
        self.inbound_notify.notify_one();
        self.outbound_notify.notify_waiters();
    }

    /// Takes all frames written so far.
    #[must_use]
    pub fn take_sent(&self) -> Vec<String> {
        self.outbound.lock().drain(..).collect()
    }

    /// Returns the number of frames written and not yet taken.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.outbound.lock().len()
    }

    /// Waits for the next written frame.
    ///
    /// Returns `None` once the socket is closed and drained.
    pub async fn next_sent(&self) -> Option<String> {
        loop {
            let notified = self.outbound_notify.notified();
            {
                let mut queue = self.outbound.lock();
                if let Some(frame) = queue.pop_front() {
                    return Some(frame);
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl WireSocket for MockSocket {
    async fn recv(&self) -> Result<Option<String>> {
        loop {
            {
                let mut queue = self.inbound.lock();
                if let Some(next) = queue.pop_front() {
                    return next.map(Some);
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return Ok(None);
            }
            self.inbound_notify.notified().await;
        }
    }

    async fn send(&self, frame: String) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::socket("mock socket closed"));
        }
        let mut queue = self.outbound.lock();
        if queue.len() >= MAX_QUEUE_SIZE {
            return Err(ConnectionError::socket("mock outbound queue full"));
        }
        queue.push_back(frame);
        drop(queue);
        self.outbound_notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.disconnect();
        Ok(())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

impl Default for MockSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSocket")
            .field("remote", &self.remote)
            .field("is_open", &self.is_open())
            .field("pending_inbound", &self.inbound.lock().len())
            .field("sent", &self.sent_count())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
