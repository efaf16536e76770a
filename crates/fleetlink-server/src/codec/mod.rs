// ============================================
// File: crates/fleetlink-server/src/codec/mod.rs
// ============================================
//! # Codec Stages
//!
//! ## Creation Reason
//! Wire encryption is attached to a connection as its outermost
//! pipeline stage. The pure crypto lives in `fleetlink-core`; these
//! stages add per-connection key state and the device key lifecycle.
//!
//! ## Submodules
//! - `v1`: Legacy codec, one global AES-256-CBC key
//! - `v2`: Current codec, per-device AES-256-GCM keys with in-band issuance
//! - `keystore`: Device key repository
//!
//! ## Error Policy
//! Codec stages register last in the error chain. Malformed or
//! undecryptable frames are dropped with a warning; anything else is
//! passed on and closes the connection.
//!
//! ## Last Modified
//! v0.1.0 - Initial codec stages

pub mod keystore;
pub mod v1;
pub mod v2;

pub use keystore::{DeviceKey, DeviceKeyRepository, ExchangeStatus, MemoryKeyStore};
pub use v1::CodecV1Stage;
pub use v2::CodecV2Stage;

use fleetlink_transport::{Connection, ConnectionError};
use tracing::warn;

/// Drops codec errors, passes everything else on.
pub(crate) fn drop_codec_error(
    stage: &'static str,
    conn: &Connection,
    error: ConnectionError,
) -> Option<ConnectionError> {
    if error.is_codec_error() {
        warn!(
            connection_id = %conn.id(),
            mac = ?conn.context().mac(),
            stage,
            error = %error,
            "Dropping frame"
        );
        None
    } else {
        Some(error)
    }
}
