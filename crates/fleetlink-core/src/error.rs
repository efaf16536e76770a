// ============================================
// File: crates/fleetlink-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines error types for the wire codecs and the application message
//! model in the FleetLink core crate.
//!
//! ## Error Categories
//! 1. **Crypto Errors**: Key handling, encryption and decryption failures
//! 2. **Protocol Errors**: Malformed frames or payloads, unknown codecs
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material in error messages
//! - `InvalidMessage` and `DecryptionFailed` drive connection policy in
//!   the server; keep them distinct
//! - All errors should be loggable without leaking secrets
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use fleetlink_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Core error types for codec and message operations.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Cryptographic Errors
    // ========================================

    /// Failed to create or parse key material.
    #[error("Key generation failed: {context}")]
    KeyGeneration {
        /// What key was being handled
        context: String,
    },

    /// Encryption operation failed.
    #[error("Encryption failed: {context}")]
    Encryption {
        /// What was being encrypted
        context: String,
    },

    /// Decryption failed (wrong key, wrong AAD or tampered data).
    #[error("Decryption failed: authentication error")]
    DecryptionFailed,

    // ========================================
    // Protocol Errors
    // ========================================

    /// Wire frame is malformed or shorter than its header.
    #[error("Invalid message: {reason}")]
    InvalidMessage {
        /// What's wrong with the frame
        reason: String,
    },

    /// Frame or plaintext exceeds the size bound.
    #[error("Message too large: max {max} bytes, got {actual}")]
    MessageTooLarge {
        /// Maximum allowed size
        max: usize,
        /// Actual size
        actual: usize,
    },

    /// Decrypted payload is not a valid application message.
    #[error("Malformed payload: {reason}")]
    MalformedPayload {
        /// Parser error
        reason: String,
    },

    /// Negotiated protocol value is not recognised.
    #[error("Unknown protocol: '{value}'")]
    UnknownProtocol {
        /// Value received in the negotiation header
        value: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `KeyGeneration` error.
    pub fn key_generation(context: impl Into<String>) -> Self {
        Self::KeyGeneration {
            context: context.into(),
        }
    }

    /// Creates an `Encryption` error.
    pub fn encryption(context: impl Into<String>) -> Self {
        Self::Encryption {
            context: context.into(),
        }
    }

    /// Creates an `InvalidMessage` error.
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }

    /// Creates a `MessageTooLarge` error.
    #[must_use]
    pub const fn too_large(max: usize, actual: usize) -> Self {
        Self::MessageTooLarge { max, actual }
    }

    /// Creates a `MalformedPayload` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this is a cryptographic error.
    #[must_use]
    pub const fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            Self::KeyGeneration { .. } | Self::Encryption { .. } | Self::DecryptionFailed
        )
    }

    /// Returns `true` if this is a protocol error.
    ///
    /// Protocol errors mean the frame is dropped and the session goes on.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMessage { .. }
                | Self::MessageTooLarge { .. }
                | Self::MalformedPayload { .. }
                | Self::UnknownProtocol { .. }
                | Self::Common(_)
        )
    }

    /// Returns `true` if this error might indicate an attack.
    #[must_use]
    pub const fn is_suspicious(&self) -> bool {
        matches!(self, Self::DecryptionFailed | Self::MessageTooLarge { .. })
    }
}

// ============================================
// Tests
// ============================================
