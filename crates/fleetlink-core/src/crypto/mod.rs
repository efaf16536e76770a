// ============================================
// File: crates/fleetlink-core/src/crypto/mod.rs
// ============================================
//! # Cryptography Module
//!
//! ## Creation Reason
//! Centralizes the wire encryption of both device codecs, using audited
//! RustCrypto implementations.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`keys`]: `MasterSecret`, `SymmetricKey`, `LegacyKey`
//! - [`v1`]: Legacy AES-256-CBC, hex framing, fixed key
//! - [`v2`]: AES-256-GCM, base64url framing, per-device keys
//!
//! ## Codec Comparison
//! ```text
//! ┌──────────┬───────────────────┬──────────────────────────────┐
//! │          │ v1 (legacy)       │ v2 (current)                 │
//! ├──────────┼───────────────────┼──────────────────────────────┤
//! │ Cipher   │ AES-256-CBC       │ AES-256-GCM (16-byte IV)     │
//! │ Key      │ global, fixed IV  │ per device, random IV        │
//! │ Framing  │ hex               │ base64url segments           │
//! │ AAD      │ none              │ device MAC on first frame    │
//! └──────────┴───────────────────┴──────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL implementations use RustCrypto (audited)
//! - NEVER roll your own crypto
//! - These functions are synchronous; keep inputs bounded
//!
//! ## Last Modified
//! v0.1.0 - Initial codec crypto

pub mod keys;
pub mod v1;
pub mod v2;

pub use keys::{LegacyKey, MasterSecret, SymmetricKey};
pub use v1::{decrypt_v1, encrypt_v1};
pub use v2::{decode_v2_frame, decrypt_v2, encrypt_v2, open_v2, V2Frame};

// ============================================
// Constants
// ============================================

/// Size of the configured master secret in bytes.
pub const MASTER_SECRET_SIZE: usize = 36;

/// Size of an AES-256 key in bytes.
pub const AES_KEY_SIZE: usize = 32;

/// Size of the v1 CBC IV in bytes.
pub const CBC_IV_SIZE: usize = 16;

/// Size of the v2 GCM IV in bytes.
pub const GCM_IV_SIZE: usize = 16;

/// Size of the v2 GCM authentication tag in bytes.
pub const GCM_TAG_SIZE: usize = 16;

/// Maximum plaintext accepted by either codec (1 MiB).
pub const MAX_PLAINTEXT_SIZE: usize = 1024 * 1024;
