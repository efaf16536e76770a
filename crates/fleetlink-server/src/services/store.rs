// ============================================
// File: crates/fleetlink-server/src/services/store.rs
// ============================================
//! # Device Store
//!
//! ## Creation Reason
//! Registry of live device connections, keyed by device identity. The
//! REST and protocol layers find a device's connection here.
//!
//! ## Main Functionality
//! - `add`: Install a connection, evicting (closing) any previous one
//! - `remove` / `remove_if`: Drop an entry (conditionally)
//! - `get` / `exists` / `find_by_id` / `find_all` / `count`
//! - `close_all`: Shutdown helper
//!
//! ## ⚠️ Important Note for Next Developer
//! - At most one connection per device: the last connection wins
//! - Close hooks must use `remove_if`, otherwise an evicted connection
//!   would remove its replacement
//! - Never hold a DashMap guard across `.await`
//!
//! ## Last Modified
//! v0.1.0 - Initial device store

use std::net::SocketAddr;

use dashmap::DashMap;
use fleetlink_common::{ConnectionId, DeviceId};
use fleetlink_core::ProtocolVersion;
use fleetlink_transport::Connection;
use serde::Serialize;
use tracing::{debug, info};

/// Snapshot of one registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    /// Device identity.
    pub device_id: DeviceId,
    /// Connection serving the device.
    pub connection_id: ConnectionId,
    /// Peer address.
    pub remote_addr: Option<SocketAddr>,
    /// Negotiated codec.
    pub protocol: Option<ProtocolVersion>,
    /// Accept time in Unix milliseconds.
    pub connected_at: u64,
}

impl DeviceRecord {
    fn from_connection(device_id: DeviceId, conn: &Connection) -> Self {
        Self {
            device_id,
            connection_id: conn.id(),
            remote_addr: conn.remote_addr(),
            protocol: conn.protocol(),
            connected_at: conn.context().connected_at(),
        }
    }
}

/// deviceId → live connection.
#[derive(Debug, Default)]
pub struct DeviceStore {
    entries: DashMap<DeviceId, Connection>,
}

impl DeviceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `conn` for `device_id`.
    ///
    /// A different connection already registered for the device is
    /// closed after the new one is installed.
    pub async fn add(&self, device_id: DeviceId, conn: Connection) {
        let previous = self.entries.insert(device_id.clone(), conn.clone());

        match previous {
            Some(prev) if !prev.ptr_eq(&conn) => {
                info!(
                    device_id = %device_id,
                    old_connection = %prev.id(),
                    new_connection = %conn.id(),
                    "Evicting previous connection"
                );
                prev.close(None).await;
            }
            _ => debug!(device_id = %device_id, connection_id = %conn.id(), "Device registered"),
        }
    }

    /// Removes the entry for `device_id`.
    pub fn remove(&self, device_id: &DeviceId) -> Option<Connection> {
        self.entries.remove(device_id).map(|(_, conn)| conn)
    }

    /// Removes the entry only if it is still `conn`.
    pub fn remove_if(&self, device_id: &DeviceId, conn: &Connection) -> bool {
        let removed = self
            .entries
            .remove_if(device_id, |_, current| current.ptr_eq(conn))
            .is_some();
        if removed {
            debug!(device_id = %device_id, connection_id = %conn.id(), "Device unregistered");
        }
        removed
    }

    /// Returns the connection for `device_id`.
    #[must_use]
    pub fn get(&self, device_id: &DeviceId) -> Option<Connection> {
        self.entries.get(device_id).map(|e| e.value().clone())
    }

    /// Returns `true` if the device is connected.
    #[must_use]
    pub fn exists(&self, device_id: &DeviceId) -> bool {
        self.entries.contains_key(device_id)
    }

    /// Returns a snapshot of one device.
    #[must_use]
    pub fn find_by_id(&self, device_id: &DeviceId) -> Option<DeviceRecord> {
        self.entries
            .get(device_id)
            .map(|e| DeviceRecord::from_connection(e.key().clone(), e.value()))
    }

    /// Returns snapshots of all devices.
    #[must_use]
    pub fn find_all(&self) -> Vec<DeviceRecord> {
        self.entries
            .iter()
            .map(|e| DeviceRecord::from_connection(e.key().clone(), e.value()))
            .collect()
    }

    /// Number of registered devices.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Closes every registered connection.
    pub async fn close_all(&self) {
        let conns: Vec<Connection> = self.entries.iter().map(|e| e.value().clone()).collect();
        info!(count = conns.len(), "Closing all device connections");
        for conn in conns {
            conn.close(None).await;
        }
        self.entries.clear();
    }
}
