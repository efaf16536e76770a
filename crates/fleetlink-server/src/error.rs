// ============================================
// File: crates/fleetlink-server/src/error.rs
// ============================================
//! # Server Error Types
//!
//! ## Last Modified
//! v0.1.0 - Initial server errors

use thiserror::Error;

use fleetlink_common::error::CommonError;
use fleetlink_core::error::CoreError;
use fleetlink_transport::error::ConnectionError;

use crate::services::guard::HealthStatus;

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server error types.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        path: String,
        reason: String,
    },

    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        field: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    ConfigMissing {
        field: String,
    },

    /// Admission rejected by the guard.
    #[error("Server unavailable: {status}")]
    ServerUnavailable {
        status: HealthStatus,
    },

    #[error("Unknown device: {reason}")]
    UnknownDevice {
        reason: String,
    },

    #[error("Key store error: {reason}")]
    KeyStore {
        reason: String,
    },

    #[error("Server failed to start: {reason}")]
    StartupFailed {
        reason: String,
    },

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn config_missing(field: impl Into<String>) -> Self {
        Self::ConfigMissing {
            field: field.into(),
        }
    }

    pub fn unknown_device(reason: impl Into<String>) -> Self {
        Self::UnknownDevice {
            reason: reason.into(),
        }
    }

    pub fn key_store(reason: impl Into<String>) -> Self {
        Self::KeyStore {
            reason: reason.into(),
        }
    }

    pub fn startup_failed(reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. } | Self::ConfigInvalid { .. } | Self::ConfigMissing { .. }
        )
    }

    /// Device identity could not be established.
    #[must_use]
    pub const fn is_identity_error(&self) -> bool {
        matches!(self, Self::UnknownDevice { .. })
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. } | Self::ConfigMissing { .. } | Self::StartupFailed { .. }
        )
    }

    /// Worth retrying later (admission rejection, transient store failure).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerUnavailable { .. } | Self::KeyStore { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::config_load("/etc/fleetlink.toml", "file not found");
        assert!(err.to_string().contains("/etc/fleetlink.toml"));

        let err = ServerError::ServerUnavailable {
            status: HealthStatus {
                event_loop_delay_ms: 600,
                ..HealthStatus::default()
            },
        };
        assert!(err.to_string().contains("600"));
    }

    #[test]
    fn test_error_classification() {
        let config_err = ServerError::config_invalid("guard.reject_delay_secs", "must be > 0");
        assert!(config_err.is_config_error());
        assert!(!config_err.is_fatal());
        assert!(ServerError::config_missing("security.master_secret").is_fatal());

        assert!(ServerError::unknown_device("no mac").is_identity_error());
        assert!(ServerError::key_store("timeout").is_retryable());
        assert!(!ServerError::ShuttingDown.is_retryable());
    }
}
