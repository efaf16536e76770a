// ============================================
// File: crates/fleetlink-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the identifiers used throughout the device communication
//! core so that a device, its hardware address and a physical connection
//! can never be confused with one another.
//!
//! ## Main Functionality
//! - `MacAddress`: 6-byte hardware address, the root of device identity
//! - `DeviceId`: Stable device identity (MAC-derived by default)
//! - `ConnectionId`: Random identifier of one physical socket
//!
//! ## Main Logical Flow
//! 1. The v2 codec learns the raw `MacAddress` from a device's first frame
//! 2. Bootstrap resolves a `DeviceId` from the MAC (or a directory lookup)
//! 3. `DeviceId` keys the store, the scheduler and the event queue
//! 4. `ConnectionId` distinguishes a stale socket from its replacement
//!
//! ## ⚠️ Important Note for Next Developer
//! - MAC text form is lowercase, colon separated (`aa:bb:cc:dd:ee:ff`)
//! - Parsing accepts `:`/`-` separators or 12 bare hex digits
//! - `ConnectionId` is random, never reuse it as a security token
//!
//! ## Last Modified
//! v0.1.0 - Initial device/connection identifiers

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::CommonError;

// ============================================
// Constants
// ============================================

/// Size of a MAC address in bytes.
pub const MAC_ADDRESS_SIZE: usize = 6;

/// Size of a ConnectionId in bytes.
pub const CONNECTION_ID_SIZE: usize = 8;

// ============================================
// MacAddress
// ============================================

/// Hardware (MAC) address of a device.
///
/// # Wire Usage
/// The raw 6 bytes are bound into the v2 codec's first frame as
/// additional authenticated data.
///
/// # Example
/// ```
/// use fleetlink_common::types::MacAddress;
///
/// let mac: MacAddress = "AA-BB-CC-DD-EE-FF".parse().unwrap();
/// assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; MAC_ADDRESS_SIZE]);

impl MacAddress {
    /// Creates a MAC address from its raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; MAC_ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a MAC address from a byte slice.
    ///
    /// # Errors
    /// Returns `InvalidLength` if the slice is not exactly 6 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CommonError> {
        if bytes.len() != MAC_ADDRESS_SIZE {
            return Err(CommonError::invalid_length(MAC_ADDRESS_SIZE, bytes.len()));
        }
        let mut raw = [0u8; MAC_ADDRESS_SIZE];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; MAC_ADDRESS_SIZE] {
        &self.0
    }

    /// Returns the address as 12 lowercase hex digits without separators.
    #[must_use]
    pub fn to_compact(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({self})")
    }
}

impl FromStr for MacAddress {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();

        if compact.len() != MAC_ADDRESS_SIZE * 2 {
            return Err(CommonError::invalid_input(
                "mac",
                format!("expected 12 hex digits, got '{s}'"),
            ));
        }

        let bytes = hex::decode(&compact)
            .map_err(|e| CommonError::invalid_input("mac", e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for MacAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================
// DeviceId
// ============================================

/// Stable identity of a device.
///
/// Opaque to this core: the default directory derives it from the MAC
/// address, other directories may map MACs to database ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives a device id from a MAC address.
    #[must_use]
    pub fn from_mac(mac: &MacAddress) -> Self {
        Self(mac.to_compact())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================
// ConnectionId
// ============================================

/// Random identifier of one physical connection.
///
/// A device that reconnects gets a new `ConnectionId`; teardown hooks
/// compare it to avoid removing the replacement connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId([u8; CONNECTION_ID_SIZE]);

impl ConnectionId {
    /// Generates a new random connection id.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = [0u8; CONNECTION_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut id);
        Self(id)
    }

    /// Creates a connection id from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; CONNECTION_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CONNECTION_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({self})")
    }
}

impl FromStr for ConnectionId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| CommonError::invalid_input("connection_id", e.to_string()))?;
        if bytes.len() != CONNECTION_ID_SIZE {
            return Err(CommonError::invalid_length(CONNECTION_ID_SIZE, bytes.len()));
        }
        let mut raw = [0u8; CONNECTION_ID_SIZE];
        raw.copy_from_slice(&bytes);
        Ok(Self(raw))
    }
}

impl Serialize for ConnectionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_formats() {
        let expected = MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

        assert_eq!("aa:bb:cc:dd:ee:ff".parse::<MacAddress>().unwrap(), expected);
        assert_eq!("AA-BB-CC-DD-EE-FF".parse::<MacAddress>().unwrap(), expected);
        assert_eq!("aabbccddeeff".parse::<MacAddress>().unwrap(), expected);
        assert_eq!(expected.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_mac_parse_rejects_garbage() {
        assert!("aa:bb:cc".parse::<MacAddress>().is_err());
        assert!("zz:bb:cc:dd:ee:ff".parse::<MacAddress>().is_err());
        assert!(MacAddress::from_slice(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_device_id_from_mac() {
        let mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let id = DeviceId::from_mac(&mac);
        assert_eq!(id.as_str(), "aabbccddeeff");
    }

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);

        let parsed: ConnectionId = id1.to_string().parse().unwrap();
        assert_eq!(parsed, id1);
    }

    #[test]
    fn test_mac_json_serialization() {
        let mac: MacAddress = "01:02:03:04:05:06".parse().unwrap();
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"01:02:03:04:05:06\"");

        let restored: MacAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, mac);
    }
}
