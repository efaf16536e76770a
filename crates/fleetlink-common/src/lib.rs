// ============================================
// File: crates/fleetlink-common/src/lib.rs
// ============================================
//! # FleetLink Common - Shared Utilities Library
//!
//! ## Creation Reason
//! Provides identifiers and utilities shared by every FleetLink crate.
//!
//! ## Main Functionality
//! - [`types`]: `DeviceId`, `MacAddress`, `ConnectionId`
//! - [`time`]: Atomic timestamps for connection activity
//! - [`error`]: Common error types and result aliases
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              fleetlink-server                       │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   fleetlink-core  ◄──  fleetlink-transport          │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │            fleetlink-common  ◄── You are here       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

pub use error::{CommonError, Result};
pub use types::{ConnectionId, DeviceId, MacAddress};
