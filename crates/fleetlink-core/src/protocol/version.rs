// ============================================
// File: crates/fleetlink-core/src/protocol/version.rs
// ============================================
//! # Protocol Versioning
//!
//! ## Creation Reason
//! The device negotiates its codec out of band, through an HTTP header
//! on the WebSocket upgrade. This type turns that header into a codec
//! selection.
//!
//! ## Version History
//! | Version | Description |
//! |---------|-------------|
//! | v1      | Legacy fixed-key AES-256-CBC, hex |
//! | v2      | Per-device AES-256-GCM, base64url, MAC-bound |
//!
//! ## ⚠️ Important Note for Next Developer
//! - Missing or unknown header values are NOT errors at accept time: the
//!   connection is kept but left inert (no codec, frames dropped)
//!
//! ## Last Modified
//! v0.1.0 - Initial version definitions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Negotiated wire codec.
///
/// # Example
/// ```
/// use fleetlink_core::protocol::ProtocolVersion;
///
/// assert_eq!(ProtocolVersion::negotiate(Some("V2")), Some(ProtocolVersion::V2));
/// assert_eq!(ProtocolVersion::negotiate(Some("v9")), None);
/// assert_eq!(ProtocolVersion::negotiate(None), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// Legacy codec.
    V1,
    /// Current codec.
    V2,
}

impl ProtocolVersion {
    /// Returns the header value for this version.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }

    /// Selects a codec from an optional header value.
    ///
    /// Returns `None` for absent or unknown values.
    #[must_use]
    pub fn negotiate(header: Option<&str>) -> Option<Self> {
        header.and_then(|h| h.parse().ok())
    }

    /// Returns `true` if this version binds frames to a device identity.
    #[must_use]
    pub const fn has_device_keys(&self) -> bool {
        matches!(self, Self::V2)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(Self::V1),
            "v2" | "2" => Ok(Self::V2),
            _ => Err(CoreError::UnknownProtocol {
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!("v1".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V1);
        assert_eq!(" V2 ".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V2);
        assert!("v3".parse::<ProtocolVersion>().is_err());
        assert!("".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_version_display() {
        assert_eq!(ProtocolVersion::V1.to_string(), "v1");
        assert_eq!(ProtocolVersion::V2.to_string(), "v2");
    }

    #[test]
    fn test_version_features() {
        assert!(ProtocolVersion::V2.has_device_keys());
        assert!(!ProtocolVersion::V1.has_device_keys());
    }
}
