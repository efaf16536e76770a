// ============================================
// File: crates/fleetlink-transport/src/middleware.rs
// ============================================
//! # Middleware Stages
//!
//! ## Creation Reason
//! Cross-cutting behavior (encryption, parsing, routing, bootstrap) is
//! layered onto a connection as stages instead of being hard-wired.
//!
//! ## Main Functionality
//! - `Middleware`: A stage with any subset of five hooks
//! - `Capabilities`: Which hooks a stage wants to be called for
//!
//! ## Ordering
//! ```text
//! use_stage(codec); use_stage(json); use_stage(router);
//!
//! incoming:  socket ─► codec ─► json ─► router ─► (reply matching)
//! outgoing:  send() ─► router ─► json ─► codec ─► socket
//! establish: codec, json, router      (registration order)
//! close:     router, json, codec      (reverse)
//! error:     router, json, codec      (reverse; outermost decides)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Default hook bodies are pass-through; only listed capabilities are
//!   ever invoked
//! - Incoming hooks run on the connection's reader: do NOT await a reply
//!   from the same device inside one, it would deadlock
//! - Do not store the `Connection` in a stage; it is passed to each hook
//!
//! ## Last Modified
//! v0.1.0 - Initial middleware trait

use async_trait::async_trait;
use fleetlink_core::protocol::Envelope;

use crate::connection::Connection;
use crate::error::{ConnectionError, Result};

// ============================================
// Capabilities
// ============================================

/// Set of hooks a stage implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    /// Transform incoming payloads.
    pub incoming: bool,
    /// Transform outgoing payloads.
    pub outgoing: bool,
    /// Run when the session is established.
    pub establish: bool,
    /// Run when the connection closes.
    pub close: bool,
    /// Inspect pipeline errors.
    pub error: bool,
}

impl Capabilities {
    /// No hooks.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            incoming: false,
            outgoing: false,
            establish: false,
            close: false,
            error: false,
        }
    }

    /// Both transform directions.
    #[must_use]
    pub const fn duplex() -> Self {
        Self::none().with_incoming().with_outgoing()
    }

    /// Adds the incoming hook.
    #[must_use]
    pub const fn with_incoming(mut self) -> Self {
        self.incoming = true;
        self
    }

    /// Adds the outgoing hook.
    #[must_use]
    pub const fn with_outgoing(mut self) -> Self {
        self.outgoing = true;
        self
    }

    /// Adds the establish hook.
    #[must_use]
    pub const fn with_establish(mut self) -> Self {
        self.establish = true;
        self
    }

    /// Adds the close hook.
    #[must_use]
    pub const fn with_close(mut self) -> Self {
        self.close = true;
        self
    }

    /// Adds the error hook.
    #[must_use]
    pub const fn with_error(mut self) -> Self {
        self.error = true;
        self
    }
}

// ============================================
// Middleware Trait
// ============================================

/// A connection pipeline stage.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Stage name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Hooks this stage implements.
    fn capabilities(&self) -> Capabilities;

    /// Transforms an incoming envelope.
    ///
    /// Returning `Ok(None)` consumes the envelope; later stages do not
    /// see it.
    ///
    /// # Errors
    /// Errors are routed to the error hooks.
    async fn incoming(&self, _conn: &Connection, envelope: Envelope) -> Result<Option<Envelope>> {
        Ok(Some(envelope))
    }

    /// Transforms an outgoing envelope.
    ///
    /// Returning `Ok(None)` drops the message silently.
    ///
    /// # Errors
    /// Errors are returned to the sender.
    async fn outgoing(&self, _conn: &Connection, envelope: Envelope) -> Result<Option<Envelope>> {
        Ok(Some(envelope))
    }

    /// Runs once the session is established.
    ///
    /// # Errors
    /// A fatal error stops the remaining establish hooks.
    async fn on_establish(&self, _conn: &Connection) -> Result<()> {
        Ok(())
    }

    /// Runs after the socket has closed.
    async fn on_close(&self, _conn: &Connection, _reason: Option<&ConnectionError>) {}

    /// Inspects a pipeline error.
    ///
    /// Return `None` to swallow the error, or `Some` to pass it on
    /// (possibly replaced) to the next, outer, error hook.
    async fn on_error(&self, _conn: &Connection, error: ConnectionError) -> Option<ConnectionError> {
        Some(error)
    }
}
