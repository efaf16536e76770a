// ============================================
// File: crates/fleetlink-core/src/crypto/keys.rs
// ============================================
//! # Cryptographic Key Types
//!
//! ## Creation Reason
//! Defines the key material used by both wire codecs with proper
//! security properties (zeroed on drop, redacted in debug output).
//!
//! ## Main Functionality
//! - `MasterSecret`: 36-byte server-wide secret from configuration
//! - `SymmetricKey`: 256-bit AES key (v2 master key or per-device key)
//! - `LegacyKey`: Fixed AES-256-CBC key + IV for codec v1
//!
//! ## Key Lifecycle
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  MasterSecret (server lifetime)                            │
//! │  ├─ v1_key(): key/IV sliced from base64(secret)            │
//! │  └─ v2_key(): first 32 raw bytes                           │
//! │                                                            │
//! │  SymmetricKey (per device, durable)                        │
//! │  ├─ Generated on first contact of an unknown MAC           │
//! │  ├─ Delivered to the device under the master key           │
//! │  └─ Used for every later frame once Complete               │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL key types MUST zeroize on drop (zeroize 1.3: manual `Drop`)
//! - Keys should NEVER be logged; `Debug` prints `[REDACTED]`
//! - The delivery string format is consumed by device firmware, do not
//!   change the 36-byte zero padding
//!
//! ## Last Modified
//! v0.1.0 - Initial key type definitions

use std::fmt;

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::RngCore;
use zeroize::Zeroize;

use super::{AES_KEY_SIZE, CBC_IV_SIZE, MASTER_SECRET_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// SymmetricKey
// ============================================

/// 256-bit symmetric key for AES-256-GCM.
///
/// # Security
/// - Zeroed on drop
/// - Never printed by `Debug`
/// - Only leaves the process through [`SymmetricKey::to_delivery_string`]
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; AES_KEY_SIZE]);

impl SymmetricKey {
    /// Generates a new random key from the thread-local CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; AES_KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Creates a key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; AES_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a key from a byte slice.
    ///
    /// # Errors
    /// Returns `KeyGeneration` if the slice is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != AES_KEY_SIZE {
            return Err(CoreError::key_generation(format!(
                "invalid AES-256 key size: expected {AES_KEY_SIZE}, got {}",
                bytes.len()
            )));
        }
        let mut raw = [0u8; AES_KEY_SIZE];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Returns the raw key bytes.
    ///
    /// # Security Warning
    /// Do not log or persist the returned bytes unprotected.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; AES_KEY_SIZE] {
        &self.0
    }

    /// Encodes the key for the key-delivery event.
    ///
    /// The key is zero-padded to the 36-byte master secret shape and
    /// encoded as unpadded base64url (48 chars).
    #[must_use]
    pub fn to_delivery_string(&self) -> String {
        let mut padded = [0u8; MASTER_SECRET_SIZE];
        padded[..AES_KEY_SIZE].copy_from_slice(&self.0);
        let encoded = URL_SAFE_NO_PAD.encode(padded);
        padded.zeroize();
        encoded
    }

    /// Parses a key from its delivery string.
    ///
    /// # Errors
    /// Returns `KeyGeneration` on invalid base64 or a short key.
    pub fn from_delivery_string(s: &str) -> Result<Self> {
        let mut raw = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| CoreError::key_generation(format!("invalid key encoding: {e}")))?;
        if raw.len() < AES_KEY_SIZE {
            raw.zeroize();
            return Err(CoreError::key_generation("delivered key too short"));
        }
        let key = Self::from_slice(&raw[..AES_KEY_SIZE]);
        raw.zeroize();
        key
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

// ============================================
// LegacyKey
// ============================================

/// Fixed AES-256-CBC key and IV used by codec v1.
///
/// There is no per-device identity in v1: every device shares this key.
#[derive(Clone)]
pub struct LegacyKey {
    key: [u8; AES_KEY_SIZE],
    iv: [u8; CBC_IV_SIZE],
}

impl LegacyKey {
    /// Creates a legacy key from raw key and IV bytes.
    #[must_use]
    pub const fn new(key: [u8; AES_KEY_SIZE], iv: [u8; CBC_IV_SIZE]) -> Self {
        Self { key, iv }
    }

    /// Returns the AES-256 key.
    #[must_use]
    pub const fn key(&self) -> &[u8; AES_KEY_SIZE] {
        &self.key
    }

    /// Returns the CBC initialization vector.
    #[must_use]
    pub const fn iv(&self) -> &[u8; CBC_IV_SIZE] {
        &self.iv
    }
}

impl fmt::Debug for LegacyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LegacyKey([REDACTED])")
    }
}

impl Drop for LegacyKey {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

// ============================================
// MasterSecret
// ============================================

/// Server-wide 36-byte master secret.
///
/// # Derivation
/// ```text
/// t          = base64(secret)            48 ASCII chars
/// v1 key     = t[0..32]                  (first 24 secret bytes)
/// v1 IV      = t[32..48]                 (next 12 secret bytes)
/// v2 master  = secret[0..32]
/// ```
///
/// # Example
/// ```
/// use fleetlink_core::crypto::MasterSecret;
///
/// let secret = MasterSecret::generate();
/// let restored = MasterSecret::from_base64(&secret.to_base64()).unwrap();
/// assert_eq!(secret.v2_key(), restored.v2_key());
/// ```
#[derive(Clone)]
pub struct MasterSecret([u8; MASTER_SECRET_SIZE]);

impl MasterSecret {
    /// Generates a new random master secret.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; MASTER_SECRET_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Creates a master secret from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; MASTER_SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parses a standard base64 master secret (as found in config files).
    ///
    /// # Errors
    /// Returns `KeyGeneration` on bad encoding or wrong length.
    pub fn from_base64(s: &str) -> Result<Self> {
        let mut raw = BASE64
            .decode(s.trim())
            .map_err(|e| CoreError::key_generation(format!("invalid master secret encoding: {e}")))?;
        if raw.len() != MASTER_SECRET_SIZE {
            let len = raw.len();
            raw.zeroize();
            return Err(CoreError::key_generation(format!(
                "master secret must be {MASTER_SECRET_SIZE} bytes, got {len}"
            )));
        }
        let mut bytes = [0u8; MASTER_SECRET_SIZE];
        bytes.copy_from_slice(&raw);
        raw.zeroize();
        Ok(Self(bytes))
    }

    /// Encodes the secret as standard base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Derives the fixed codec v1 key and IV.
    #[must_use]
    pub fn v1_key(&self) -> LegacyKey {
        let text = BASE64.encode(self.0);
        let bytes = text.as_bytes();

        let mut key = [0u8; AES_KEY_SIZE];
        let mut iv = [0u8; CBC_IV_SIZE];
        key.copy_from_slice(&bytes[..AES_KEY_SIZE]);
        iv.copy_from_slice(&bytes[AES_KEY_SIZE..AES_KEY_SIZE + CBC_IV_SIZE]);

        LegacyKey::new(key, iv)
    }

    /// Returns the codec v2 master key.
    #[must_use]
    pub fn v2_key(&self) -> SymmetricKey {
        let mut key = [0u8; AES_KEY_SIZE];
        key.copy_from_slice(&self.0[..AES_KEY_SIZE]);
        SymmetricKey::from_bytes(key)
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterSecret([REDACTED])")
    }
}

impl Drop for MasterSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_key_generation() {
        let k1 = SymmetricKey::generate();
        let k2 = SymmetricKey::generate();
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_delivery_string_shape() {
        let key = SymmetricKey::from_bytes([0x42; 32]);
        let delivered = key.to_delivery_string();

        // 36 bytes -> 48 base64 chars, no padding
        assert_eq!(delivered.len(), 48);
        assert!(!delivered.contains('='));
        assert!(delivered.ends_with("AAAA"));

        let parsed = SymmetricKey::from_delivery_string(&delivered).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_master_secret_derivation() {
        let secret = MasterSecret::from_bytes([7u8; MASTER_SECRET_SIZE]);
        let text = secret.to_base64();
        assert_eq!(text.len(), 48);

        let legacy = secret.v1_key();
        assert_eq!(legacy.key(), &text.as_bytes()[..32]);
        assert_eq!(legacy.iv(), &text.as_bytes()[32..48]);

        assert_eq!(secret.v2_key().as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn test_master_secret_rejects_wrong_length() {
        let short = BASE64.encode([1u8; 20]);
        assert!(MasterSecret::from_base64(&short).is_err());
        assert!(MasterSecret::from_base64("not base64!!").is_err());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = SymmetricKey::from_bytes([0xAB; 32]);
        let printed = format!("{key:?}");
        assert!(printed.contains("REDACTED"));
        assert!(!printed.contains("171"));
    }
}
