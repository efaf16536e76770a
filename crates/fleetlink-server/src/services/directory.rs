// ============================================
// File: crates/fleetlink-server/src/services/directory.rs
// ============================================
//! # Device Directory
//!
//! Resolves the identity of a device from its hello. The default
//! `MacDirectory` derives the id from the MAC address; a database-backed
//! directory implements the same trait.

use async_trait::async_trait;
use fleetlink_common::{DeviceId, MacAddress};
use fleetlink_core::protocol::DeviceHello;
use tracing::debug;

use crate::error::{Result, ServerError};

/// Maps a device hello to a stable identity.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Resolves the device identity.
    ///
    /// `mac` is the address authenticated by the codec, if any.
    ///
    /// # Errors
    /// `UnknownDevice` if the device cannot be identified.
    async fn resolve(&self, hello: &DeviceHello, mac: Option<MacAddress>) -> Result<DeviceId>;
}

/// Directory deriving the id from the MAC address.
#[derive(Debug, Clone, Copy, Default)]
pub struct MacDirectory;

#[async_trait]
impl DeviceDirectory for MacDirectory {
    async fn resolve(&self, hello: &DeviceHello, mac: Option<MacAddress>) -> Result<DeviceId> {
        // Codec-authenticated MAC wins over the self-reported one
        let mac = match (mac, hello.mac.as_deref()) {
            (Some(mac), _) => mac,
            (None, Some(raw)) => raw
                .parse::<MacAddress>()
                .map_err(|e| ServerError::unknown_device(format!("invalid MAC {raw:?}: {e}")))?,
            (None, None) => return Err(ServerError::unknown_device("hello carries no MAC")),
        };

        let id = DeviceId::from_mac(&mac);
        debug!(mac = %mac, device_id = %id, "Device resolved");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello(mac: Option<&str>) -> DeviceHello {
        DeviceHello {
            mac: mac.map(str::to_string),
            ..DeviceHello::default()
        }
    }

    #[tokio::test]
    async fn test_codec_mac_preferred() {
        let codec_mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let id = MacDirectory
            .resolve(&hello(Some("11:22:33:44:55:66")), Some(codec_mac))
            .await
            .unwrap();
        assert_eq!(id, DeviceId::from_mac(&codec_mac));
    }

    #[tokio::test]
    async fn test_hello_mac_used_without_codec_mac() {
        let id = MacDirectory.resolve(&hello(Some("AA-BB-CC-DD-EE-FF")), None).await.unwrap();
        assert_eq!(id, DeviceId::from_mac(&"aa:bb:cc:dd:ee:ff".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_missing_or_invalid_mac_is_unknown_device() {
        let missing = MacDirectory.resolve(&hello(None), None).await;
        assert!(matches!(missing, Err(ServerError::UnknownDevice { .. })));

        let invalid = MacDirectory.resolve(&hello(Some("not-a-mac")), None).await;
        assert!(invalid.unwrap_err().is_identity_error());
    }
}
