// ============================================
// File: crates/fleetlink-server/src/codec/keystore.rs
// ============================================
//! # Device Key Repository
//!
//! ## Creation Reason
//! The v2 codec issues one symmetric key per device MAC. Keys outlive
//! connections, so they are persisted behind a repository trait.
//!
//! ## Main Functionality
//! - `DeviceKeyRepository`: `find_by_mac` / `create` / `update` / `update_status`
//! - `MemoryKeyStore`: In-process implementation (dashmap)
//!
//! ## Key Lifecycle
//! ```text
//! (none) ──create──► Pending ──first decrypt under issued key──► Complete
//!                       ▲                                          │
//!                       └──────────────── update (rotation) ───────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Last writer wins; there is no transactional guarantee
//! - `update` resets the status to Pending, the device must prove it
//!   picked up the new key
//!
//! ## Last Modified
//! v0.1.0 - Initial key repository

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use fleetlink_common::time::unix_timestamp_millis;
use fleetlink_common::MacAddress;
use fleetlink_core::SymmetricKey;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, ServerError};

/// Key exchange progress of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    /// Key issued, device has not used it yet.
    Pending,
    /// Device decrypted and re-encrypted with the issued key.
    Complete,
}

impl fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Complete => f.write_str("complete"),
        }
    }
}

/// Stored key of one device.
#[derive(Debug, Clone)]
pub struct DeviceKey {
    /// Device MAC.
    pub mac: MacAddress,
    /// Issued key.
    pub key: SymmetricKey,
    /// Exchange status.
    pub status: ExchangeStatus,
    /// Last write in Unix milliseconds.
    pub updated_at: u64,
}

/// Device key persistence.
#[async_trait]
pub trait DeviceKeyRepository: Send + Sync {
    /// Looks up the key of `mac`.
    ///
    /// # Errors
    /// Returns error if the backing store fails.
    async fn find_by_mac(&self, mac: &MacAddress) -> Result<Option<DeviceKey>>;

    /// Stores a new key in `Pending` state.
    ///
    /// # Errors
    /// Returns error if the backing store fails.
    async fn create(&self, mac: MacAddress, key: SymmetricKey) -> Result<DeviceKey>;

    /// Replaces the key of `mac`, resetting it to `Pending`.
    ///
    /// # Errors
    /// `KeyStore` if no key exists for `mac`.
    async fn update(&self, mac: &MacAddress, key: SymmetricKey) -> Result<DeviceKey>;

    /// Sets the exchange status of `mac`.
    ///
    /// # Errors
    /// `KeyStore` if no key exists for `mac`.
    async fn update_status(&self, mac: &MacAddress, status: ExchangeStatus) -> Result<()>;
}

/// In-memory key repository.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: DashMap<MacAddress, DeviceKey>,
}

impl MemoryKeyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl DeviceKeyRepository for MemoryKeyStore {
    async fn find_by_mac(&self, mac: &MacAddress) -> Result<Option<DeviceKey>> {
        Ok(self.keys.get(mac).map(|e| e.value().clone()))
    }

    async fn create(&self, mac: MacAddress, key: SymmetricKey) -> Result<DeviceKey> {
        let entry = DeviceKey {
            mac,
            key,
            status: ExchangeStatus::Pending,
            updated_at: unix_timestamp_millis(),
        };
        self.keys.insert(mac, entry.clone());
        debug!(mac = %mac, "Device key created");
        Ok(entry)
    }

    async fn update(&self, mac: &MacAddress, key: SymmetricKey) -> Result<DeviceKey> {
        let mut entry = self
            .keys
            .get_mut(mac)
            .ok_or_else(|| ServerError::key_store(format!("no key for {mac}")))?;
        entry.key = key;
        entry.status = ExchangeStatus::Pending;
        entry.updated_at = unix_timestamp_millis();
        debug!(mac = %mac, "Device key replaced");
        Ok(entry.clone())
    }

    async fn update_status(&self, mac: &MacAddress, status: ExchangeStatus) -> Result<()> {
        let mut entry = self
            .keys
            .get_mut(mac)
            .ok_or_else(|| ServerError::key_store(format!("no key for {mac}")))?;
        entry.status = status;
        entry.updated_at = unix_timestamp_millis();
        debug!(mac = %mac, status = %status, "Device key status updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        "aa:bb:cc:dd:ee:ff".parse().unwrap()
    }

    #[tokio::test]
    async fn test_create_then_complete() {
        let store = MemoryKeyStore::new();
        assert!(store.find_by_mac(&mac()).await.unwrap().is_none());

        let key = SymmetricKey::generate();
        let created = store.create(mac(), key.clone()).await.unwrap();
        assert_eq!(created.status, ExchangeStatus::Pending);

        store.update_status(&mac(), ExchangeStatus::Complete).await.unwrap();
        let found = store.find_by_mac(&mac()).await.unwrap().unwrap();
        assert_eq!(found.status, ExchangeStatus::Complete);
        assert_eq!(found.key, key);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_resets_to_pending() {
        let store = MemoryKeyStore::new();
        store.create(mac(), SymmetricKey::generate()).await.unwrap();
        store.update_status(&mac(), ExchangeStatus::Complete).await.unwrap();

        let rotated = SymmetricKey::generate();
        let updated = store.update(&mac(), rotated.clone()).await.unwrap();
        assert_eq!(updated.status, ExchangeStatus::Pending);
        assert_eq!(updated.key, rotated);
    }

    #[tokio::test]
    async fn test_unknown_mac_errors() {
        let store = MemoryKeyStore::new();
        let err = store.update_status(&mac(), ExchangeStatus::Complete).await.unwrap_err();
        assert!(matches!(err, ServerError::KeyStore { .. }));
        assert!(store.update(&mac(), SymmetricKey::generate()).await.is_err());
        assert!(store.is_empty());
    }
}
