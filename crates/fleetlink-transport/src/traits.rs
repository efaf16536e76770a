// ============================================
// File: crates/fleetlink-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! Defines the socket abstraction a `Connection` runs over, so the whole
//! pipeline can be exercised in tests without a network.
//!
//! ## Main Functionality
//! - `WireSocket`: Message-oriented, text-framed duplex socket
//!
//! ## Design Philosophy
//! - Traits enable mock implementations for testing
//! - Async-first design with `async_trait`
//! - `recv` and `send` may run concurrently from different tasks
//!
//! ## ⚠️ Important Note for Next Developer
//! - Exactly one task calls `recv` (the connection reader)
//! - `close` must not wait for the reader to finish
//! - Implementations must be Send + Sync
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Result;

/// Message-oriented duplex socket carrying text frames.
///
/// # Example
/// ```ignore
/// async fn echo<S: WireSocket>(socket: &S) -> Result<()> {
///     while let Some(frame) = socket.recv().await? {
///         socket.send(frame).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait WireSocket: Send + Sync {
    /// Receives the next text frame.
    ///
    /// # Returns
    /// `Ok(None)` when the peer closed the socket.
    ///
    /// # Errors
    /// Returns error if the socket fails.
    async fn recv(&self) -> Result<Option<String>>;

    /// Sends a text frame.
    ///
    /// # Errors
    /// Returns error if the write fails or the socket is closed.
    async fn send(&self, frame: String) -> Result<()>;

    /// Closes the socket. Idempotent.
    ///
    /// # Errors
    /// Returns error if the close handshake fails.
    async fn close(&self) -> Result<()>;

    /// Returns the peer address, if known.
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Returns `true` while the socket accepts writes.
    fn is_open(&self) -> bool;
}
