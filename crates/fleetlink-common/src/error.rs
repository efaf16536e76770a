// ============================================
// File: crates/fleetlink-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! ## Creation Reason
//! Foundational error type for identifier parsing and shared validation,
//! wrapped by every other crate's error enum.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never include key material in error messages
//! - Implement `From` on the wrapping crates, not here
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

/// Common result type.
pub type Result<T> = std::result::Result<T, CommonError>;

/// Identifier parsing errors.
#[derive(Error, Debug)]
pub enum CommonError {
    /// Invalid input data provided.
    #[error("Invalid input for '{field}': {reason}")]
    InvalidInput {
        /// Name of the field or parameter
        field: String,
        /// Description of what's wrong
        reason: String,
    },

    /// Data length doesn't match expected size.
    #[error("Invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length received
        actual: usize,
    },
}

impl CommonError {
    /// Creates an `InvalidInput` error.
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidLength` error.
    #[must_use]
    pub const fn invalid_length(expected: usize, actual: usize) -> Self {
        Self::InvalidLength { expected, actual }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommonError::invalid_input("mac", "expected 12 hex digits");
        assert!(err.to_string().contains("mac"));
        assert!(err.to_string().contains("12 hex digits"));
    }

    #[test]
    fn test_length_error_display() {
        let err = CommonError::invalid_length(6, 3);
        assert_eq!(err.to_string(), "Invalid length: expected 6, got 3");
    }
}
