// ============================================
// File: crates/fleetlink-server/src/config.rs
// ============================================
//! # Server Configuration
//!
//! ## Creation Reason
//! Provides configuration management for the FleetLink server,
//! loaded from a TOML file.
//!
//! ## Main Functionality
//! - `ServerConfig`: Main configuration structure
//! - TOML file loading and parsing
//! - Configuration validation
//! - Default values for every field
//!
//! ## Configuration Sections
//! - `network`: WebSocket listen address, protocol header name
//! - `security`: Master secret (inline or file)
//! - `guard`: Admission control ceilings
//! - `rpc`: Request and handshake timeouts
//! - `scheduler`: Periodic action runner tuning
//! - `bootstrap`: Invalid-device hold delay
//! - `intervals`: Named polling intervals, with per-device overrides
//! - `logging`: Log level
//!
//! ## Example Configuration
//! ```toml
//! [network]
//! listen_addr = "0.0.0.0:8443"
//! protocol_header = "x-device-protocol"
//!
//! [security]
//! master_secret_file = "/etc/fleetlink/master.key"
//!
//! [guard]
//! check_interval_ms = 1000
//! max_event_loop_delay_ms = 500
//! max_resident_memory_mb = 2048
//!
//! [intervals]
//! ping = 30000
//! stats = 60000
//!
//! [devices.aabbccddeeff.intervals]
//! stats = 10000
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All config changes require server restart; per-device intervals
//!   can additionally be changed at runtime through `ConfigSettings`
//! - Guard ceilings use 0 for "unlimited"
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use fleetlink_core::MasterSecret;

use crate::error::{Result, ServerError};

// ============================================
// ServerConfig
// ============================================

/// Main server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Master secret configuration.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Admission control.
    #[serde(default)]
    pub guard: GuardConfig,

    /// Request/response timeouts.
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Periodic action scheduler.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Device bootstrap.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// Named polling intervals in milliseconds.
    #[serde(default = "default_intervals")]
    pub intervals: HashMap<String, u64>,

    /// Per-device overrides, keyed by device id.
    #[serde(default)]
    pub devices: HashMap<String, DeviceConfig>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed, or fails validation.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServerError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ServerError::config_load(&path_str, e.to_string()))?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a string (useful for testing).
    ///
    /// # Errors
    /// Returns error if the content cannot be parsed or fails validation.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ServerError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.security.validate()?;
        self.guard.validate()?;
        self.rpc.validate()?;
        self.scheduler.validate()?;

        for (name, ms) in &self.intervals {
            if *ms == 0 {
                return Err(ServerError::config_invalid(
                    format!("intervals.{name}"),
                    "must be greater than 0",
                ));
            }
        }
        for (device, overrides) in &self.devices {
            for (name, ms) in &overrides.intervals {
                if *ms == 0 {
                    return Err(ServerError::config_invalid(
                        format!("devices.{device}.intervals.{name}"),
                        "must be greater than 0",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Serializes configuration to TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Returns listen address (from network config).
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        self.network.listen_addr
    }
}

// ============================================
// NetworkConfig
// ============================================

/// Network configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// WebSocket listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Upgrade header carrying the codec version.
    #[serde(default = "default_protocol_header")]
    pub protocol_header: String,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8443))
}

fn default_protocol_header() -> String {
    "x-device-protocol".to_string()
}

impl NetworkConfig {
    fn validate(&self) -> Result<()> {
        if self.listen_addr.port() == 0 {
            return Err(ServerError::config_invalid(
                "network.listen_addr",
                "port cannot be 0",
            ));
        }
        if self.protocol_header.trim().is_empty() {
            return Err(ServerError::config_invalid(
                "network.protocol_header",
                "cannot be empty",
            ));
        }
        Ok(())
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            protocol_header: default_protocol_header(),
        }
    }
}

// ============================================
// SecurityConfig
// ============================================

/// Master secret configuration section.
///
/// Exactly one of the two fields should be set; the inline value wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Base64 master secret (36 bytes).
    #[serde(default)]
    pub master_secret: Option<String>,

    /// File containing the base64 master secret.
    #[serde(default)]
    pub master_secret_file: Option<String>,
}

impl SecurityConfig {
    fn validate(&self) -> Result<()> {
        if let Some(secret) = &self.master_secret {
            MasterSecret::from_base64(secret)
                .map_err(|e| ServerError::config_invalid("security.master_secret", e.to_string()))?;
        }
        Ok(())
    }

    /// Resolves the master secret.
    ///
    /// # Errors
    /// - `ConfigMissing` if neither field is set
    /// - `ConfigLoad` if the file cannot be read
    /// - `ConfigInvalid` if the secret is malformed
    pub async fn load_master_secret(&self) -> Result<MasterSecret> {
        let (encoded, field) = match (&self.master_secret, &self.master_secret_file) {
            (Some(inline), _) => (inline.clone(), "security.master_secret"),
            (None, Some(path)) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| ServerError::config_load(path, e.to_string()))?;
                (content, "security.master_secret_file")
            }
            (None, None) => return Err(ServerError::config_missing("security.master_secret")),
        };

        MasterSecret::from_base64(&encoded).map_err(|e| ServerError::config_invalid(field, e.to_string()))
    }
}

// ============================================
// GuardConfig
// ============================================

/// Admission control section. Every ceiling uses 0 for unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Health sampling interval; 0 disables sampling.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Event-loop lag ceiling.
    #[serde(default)]
    pub max_event_loop_delay_ms: u64,

    /// Process virtual memory ceiling.
    #[serde(default)]
    pub max_virtual_memory_mb: u64,

    /// Process resident memory ceiling.
    #[serde(default)]
    pub max_resident_memory_mb: u64,

    /// How long a rejected client waits for its 503.
    #[serde(default = "default_reject_delay_secs")]
    pub reject_delay_secs: u64,
}

fn default_check_interval_ms() -> u64 {
    1000
}

fn default_reject_delay_secs() -> u64 {
    20
}

impl GuardConfig {
    fn validate(&self) -> Result<()> {
        if self.reject_delay_secs > 300 {
            return Err(ServerError::config_invalid(
                "guard.reject_delay_secs",
                "cannot exceed 300",
            ));
        }
        Ok(())
    }

    /// Sampling interval, `None` when disabled.
    #[must_use]
    pub const fn check_interval(&self) -> Option<Duration> {
        if self.check_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.check_interval_ms))
        }
    }

    /// Rejection delay.
    #[must_use]
    pub const fn reject_delay(&self) -> Duration {
        Duration::from_secs(self.reject_delay_secs)
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            max_event_loop_delay_ms: 0,
            max_virtual_memory_mb: 0,
            max_resident_memory_mb: 0,
            reject_delay_secs: default_reject_delay_secs(),
        }
    }
}

// ============================================
// RpcConfig
// ============================================

/// Request/response timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Default `request`/`command` timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Time allowed for the WebSocket upgrade and the device hello.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_handshake_timeout_secs() -> u64 {
    30
}

impl RpcConfig {
    fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(ServerError::config_invalid(
                "rpc.request_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(ServerError::config_invalid(
                "rpc.handshake_timeout_secs",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Handshake timeout.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

// ============================================
// SchedulerConfig
// ============================================

/// Periodic action scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum concurrently running actions.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Entries due within this window fire together.
    #[serde(default = "default_tolerance_ms")]
    pub tolerance_ms: u64,

    /// Re-arm the timer only if the new minimum is this much earlier.
    #[serde(default = "default_rearm_threshold_ms")]
    pub rearm_threshold_ms: u64,
}

fn default_concurrency() -> usize {
    100
}

fn default_tolerance_ms() -> u64 {
    50
}

fn default_rearm_threshold_ms() -> u64 {
    1000
}

impl SchedulerConfig {
    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(ServerError::config_invalid(
                "scheduler.concurrency",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Coalescing window.
    #[must_use]
    pub const fn tolerance(&self) -> Duration {
        Duration::from_millis(self.tolerance_ms)
    }

    /// Re-arm threshold.
    #[must_use]
    pub const fn rearm_threshold(&self) -> Duration {
        Duration::from_millis(self.rearm_threshold_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            tolerance_ms: default_tolerance_ms(),
            rearm_threshold_ms: default_rearm_threshold_ms(),
        }
    }
}

// ============================================
// BootstrapConfig
// ============================================

/// Device bootstrap section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Hold time before closing a connection from an unknown device.
    #[serde(default = "default_invalid_device_delay_secs")]
    pub invalid_device_delay_secs: u64,

    /// Interval name used for the keep-alive ping.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: String,
}

fn default_invalid_device_delay_secs() -> u64 {
    20
}

fn default_ping_interval() -> String {
    "ping".to_string()
}

impl BootstrapConfig {
    /// Invalid-device hold delay.
    #[must_use]
    pub const fn invalid_device_delay(&self) -> Duration {
        Duration::from_secs(self.invalid_device_delay_secs)
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            invalid_device_delay_secs: default_invalid_device_delay_secs(),
            ping_interval: default_ping_interval(),
        }
    }
}

// ============================================
// Intervals / devices
// ============================================

fn default_intervals() -> HashMap<String, u64> {
    HashMap::from([("ping".to_string(), 30_000)])
}

/// Per-device overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Interval overrides in milliseconds.
    #[serde(default)]
    pub intervals: HashMap<String, u64>,

    /// Settings pushed to the device after bootstrap.
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.protocol_header, "x-device-protocol");
        assert_eq!(config.guard.reject_delay(), Duration::from_secs(20));
        assert_eq!(config.rpc.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.scheduler.concurrency, 100);
    }

    #[test]
    fn test_full_config_format() {
        let toml = r#"
            [network]
            listen_addr = "0.0.0.0:9000"

            [guard]
            check_interval_ms = 0
            max_event_loop_delay_ms = 500

            [rpc]
            request_timeout_secs = 10

            [intervals]
            ping = 1000
            stats = 60000

            [devices.aabbccddeeff.intervals]
            stats = 5000

            [devices.aabbccddeeff.settings]
            led = "off"

            [logging]
            level = "debug"
        "#;

        let config = ServerConfig::from_str(toml).unwrap();
        assert_eq!(config.listen_addr().port(), 9000);
        assert_eq!(config.guard.check_interval(), None);
        assert_eq!(config.guard.max_event_loop_delay_ms, 500);
        assert_eq!(config.intervals.get("stats"), Some(&60_000));
        let device = &config.devices["aabbccddeeff"];
        assert_eq!(device.intervals.get("stats"), Some(&5000));
        assert_eq!(device.settings.as_ref().unwrap()["led"], "off");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_toml_output_reloads() {
        let config = ServerConfig::from_str("[intervals]\nping = 5000\n").unwrap();
        let reloaded = ServerConfig::from_str(&config.to_toml()).unwrap();
        assert_eq!(reloaded.intervals.get("ping"), Some(&5000));
        assert_eq!(reloaded.network.protocol_header, config.network.protocol_header);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = ServerConfig::from_str("[intervals]\nping = 0\n").unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("intervals.ping"));
    }

    #[test]
    fn test_invalid_inline_secret_rejected() {
        let err = ServerConfig::from_str("[security]\nmaster_secret = \"short\"\n").unwrap_err();
        assert!(err.to_string().contains("security.master_secret"));
    }

    #[tokio::test]
    async fn test_master_secret_resolution() {
        let secret = MasterSecret::generate();
        let security = SecurityConfig {
            master_secret: Some(secret.to_base64()),
            master_secret_file: None,
        };
        let loaded = security.load_master_secret().await.unwrap();
        assert_eq!(loaded.to_base64(), secret.to_base64());

        let missing = SecurityConfig::default().load_master_secret().await.unwrap_err();
        assert!(missing.is_fatal());
    }
}
