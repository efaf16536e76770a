// ============================================
// File: crates/fleetlink-transport/src/error.rs
// ============================================
//! # Connection Error Types
//!
//! ## Creation Reason
//! Defines error types for socket I/O, the middleware pipeline and the
//! request/response layer of a device connection.
//!
//! ## Error Categories
//! 1. **Lifecycle**: `Closed` when operating on a closed connection
//! 2. **RPC**: `RpcTimeout` / `Rpc`, scoped to one call, never fatal
//! 3. **Socket**: Send/receive failures, usually end the connection
//! 4. **Pipeline**: Codec and stage failures routed to error hooks
//!
//! ## ⚠️ Important Note for Next Developer
//! - RPC errors must NEVER close the connection
//! - `is_fatal` decides whether `establish()` short-circuits
//! - Keep key material out of messages
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;
use std::time::Duration;

use thiserror::Error;

use fleetlink_common::error::CommonError;
use fleetlink_core::error::CoreError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for connection operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;

// ============================================
// ConnectionError
// ============================================

/// Connection layer error types.
#[derive(Error, Debug)]
pub enum ConnectionError {
    // ========================================
    // Lifecycle Errors
    // ========================================

    /// The connection is already closed.
    #[error("Connection closed")]
    Closed,

    // ========================================
    // RPC Errors
    // ========================================

    /// No reply arrived in time.
    #[error("RPC '{id}' timed out after {timeout:?}")]
    RpcTimeout {
        /// Correlation id of the request
        id: String,
        /// Configured timeout
        timeout: Duration,
    },

    /// The peer replied with an error.
    #[error("RPC '{id}' failed: {message}")]
    Rpc {
        /// Correlation id of the request
        id: String,
        /// Error reported by the peer
        message: String,
    },

    // ========================================
    // Socket Errors
    // ========================================

    /// Underlying socket failed.
    #[error("Socket error: {reason}")]
    Socket {
        /// What went wrong
        reason: String,
    },

    /// I/O error from the system.
    #[error("I/O error: {context}")]
    Io {
        /// What was happening when the error occurred
        context: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    // ========================================
    // Pipeline Errors
    // ========================================

    /// A stage failed in a way that ends the session.
    #[error("Handshake failed: {reason}")]
    Handshake {
        /// Why the handshake failed
        reason: String,
    },

    /// A stage failed without ending the session.
    #[error("Stage '{stage}' failed: {reason}")]
    Stage {
        /// Stage name
        stage: &'static str,
        /// Failure description
        reason: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Codec or message error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl ConnectionError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `Socket` error.
    pub fn socket(reason: impl Into<String>) -> Self {
        Self::Socket {
            reason: reason.into(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a `Handshake` error.
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Handshake {
            reason: reason.into(),
        }
    }

    /// Creates a `Stage` error.
    pub fn stage(stage: &'static str, reason: impl Into<String>) -> Self {
        Self::Stage {
            stage,
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if the session cannot continue after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::Socket { .. } | Self::Io { .. } | Self::Handshake { .. }
        )
    }

    /// Returns `true` if this error is scoped to one request.
    #[must_use]
    pub const fn is_rpc_error(&self) -> bool {
        matches!(self, Self::RpcTimeout { .. } | Self::Rpc { .. })
    }

    /// Returns `true` for malformed or undecryptable frames.
    ///
    /// These are dropped with a warning; the session goes on.
    #[must_use]
    pub const fn is_codec_error(&self) -> bool {
        match self {
            Self::Core(e) => e.is_protocol_error() || e.is_crypto_error(),
            _ => false,
        }
    }
}

// ============================================
// Error Conversions
// ============================================

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            context: "unspecified I/O operation".into(),
            source: err,
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConnectionError::RpcTimeout {
            id: "abc".into(),
            timeout: Duration::from_millis(100),
        };
        assert!(err.to_string().contains("abc"));
        assert!(err.to_string().contains("100ms"));
    }

    #[test]
    fn test_error_classification() {
        assert!(ConnectionError::Closed.is_fatal());
        assert!(ConnectionError::socket("reset").is_fatal());

        let rpc = ConnectionError::Rpc {
            id: "1".into(),
            message: "denied".into(),
        };
        assert!(rpc.is_rpc_error());
        assert!(!rpc.is_fatal());

        let codec: ConnectionError = CoreError::DecryptionFailed.into();
        assert!(codec.is_codec_error());
        assert!(!codec.is_fatal());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err: ConnectionError = io_err.into();
        assert!(err.is_fatal());
    }
}
