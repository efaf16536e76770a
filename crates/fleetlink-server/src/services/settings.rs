// ============================================
// File: crates/fleetlink-server/src/services/settings.rs
// ============================================
//! # Device Settings
//!
//! ## Creation Reason
//! Polling intervals and per-device settings come from outside this
//! core. These traits are the seams; `ConfigSettings` backs both with
//! the server config plus runtime overrides.
//!
//! ## Main Functionality
//! - `IntervalProvider`: Current delay for (device, interval name)
//! - `SettingsProvider`: Settings applied to a freshly bootstrapped device
//! - `ConfigSettings`: Config-backed implementation of both
//!
//! ## ⚠️ Important Note for Next Developer
//! - Intervals are looked up again after every scheduler run, so a
//!   `set_interval` takes effect on the next reschedule
//! - Unknown interval names fall back to `FALLBACK_INTERVAL`
//!
//! ## Last Modified
//! v0.1.0 - Initial settings collaborators

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use fleetlink_common::DeviceId;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::error::Result;

/// Delay used for interval names nobody configured.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(60);

// ============================================
// Traits
// ============================================

/// Supplies polling delays.
#[async_trait]
pub trait IntervalProvider: Send + Sync {
    /// Returns the current delay for `name` on `device`.
    async fn interval(&self, device: &DeviceId, name: &str) -> Duration;
}

/// Settings applied after bootstrap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSettings {
    /// Device configuration to push, if any.
    pub config: Option<Value>,
}

/// Supplies per-device settings.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// Loads settings for `device`.
    ///
    /// # Errors
    /// Returns error if the backing store fails.
    async fn load(&self, device: &DeviceId) -> Result<DeviceSettings>;
}

// ============================================
// ConfigSettings
// ============================================

/// Config-backed settings with runtime interval overrides.
#[derive(Debug, Default)]
pub struct ConfigSettings {
    /// Global intervals in milliseconds.
    defaults: HashMap<String, u64>,
    /// Per-device overrides in milliseconds.
    overrides: DashMap<DeviceId, HashMap<String, u64>>,
    /// Per-device configuration.
    configs: HashMap<DeviceId, Value>,
}

impl ConfigSettings {
    /// Builds settings from the server config.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        let overrides = DashMap::new();
        let mut configs = HashMap::new();
        for (id, device) in &config.devices {
            let id = DeviceId::new(id.as_str());
            if !device.intervals.is_empty() {
                overrides.insert(id.clone(), device.intervals.clone());
            }
            if let Some(settings) = &device.settings {
                configs.insert(id, settings.clone());
            }
        }

        Self {
            defaults: config.intervals.clone(),
            overrides,
            configs,
        }
    }

    /// Overrides one interval for one device.
    pub fn set_interval(&self, device: &DeviceId, name: &str, interval: Duration) {
        let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        debug!(device_id = %device, interval = name, ms, "Interval override set");
        self.overrides
            .entry(device.clone())
            .or_default()
            .insert(name.to_string(), ms);
    }

    fn lookup_ms(&self, device: &DeviceId, name: &str) -> Option<u64> {
        self.overrides
            .get(device)
            .and_then(|o| o.get(name).copied())
            .or_else(|| self.defaults.get(name).copied())
    }
}

#[async_trait]
impl IntervalProvider for ConfigSettings {
    async fn interval(&self, device: &DeviceId, name: &str) -> Duration {
        if let Some(ms) = self.lookup_ms(device, name) {
            Duration::from_millis(ms)
        } else {
            warn!(device_id = %device, interval = name, "Unknown interval, using fallback");
            FALLBACK_INTERVAL
        }
    }
}

#[async_trait]
impl SettingsProvider for ConfigSettings {
    async fn load(&self, device: &DeviceId) -> Result<DeviceSettings> {
        Ok(DeviceSettings {
            config: self.configs.get(device).cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ConfigSettings {
        ConfigSettings::from_config(
            &ServerConfig::from_str(
                r#"
                [intervals]
                ping = 1000
                stats = 60000

                [devices.dev1.intervals]
                stats = 5000

                [devices.dev1.settings]
                led = "on"
                "#,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_interval_lookup_order() {
        let settings = settings();
        let dev1 = DeviceId::new("dev1");
        let dev2 = DeviceId::new("dev2");

        assert_eq!(settings.interval(&dev1, "stats").await, Duration::from_secs(5));
        assert_eq!(settings.interval(&dev2, "stats").await, Duration::from_secs(60));
        assert_eq!(settings.interval(&dev1, "ping").await, Duration::from_secs(1));
        assert_eq!(settings.interval(&dev1, "nope").await, FALLBACK_INTERVAL);
    }

    #[tokio::test]
    async fn test_runtime_override() {
        let settings = settings();
        let dev2 = DeviceId::new("dev2");

        settings.set_interval(&dev2, "ping", Duration::from_millis(250));
        assert_eq!(settings.interval(&dev2, "ping").await, Duration::from_millis(250));
        assert_eq!(settings.interval(&DeviceId::new("dev1"), "ping").await, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_device_settings() {
        let settings = settings();
        let loaded = settings.load(&DeviceId::new("dev1")).await.unwrap();
        assert_eq!(loaded.config.unwrap()["led"], "on");
        assert_eq!(settings.load(&DeviceId::new("dev2")).await.unwrap(), DeviceSettings::default());
    }
}
