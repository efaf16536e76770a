// ============================================
// File: crates/fleetlink-core/src/lib.rs
// ============================================
//! # FleetLink Core - Codec & Message Library
//!
//! ## Creation Reason
//! Provides the wire cryptography and the application message model for
//! device sessions. This crate is pure: no I/O, no runtime.
//!
//! ## Main Functionality
//!
//! ### Crypto Module ([`crypto`])
//! - Key types (`MasterSecret`, `SymmetricKey`, `LegacyKey`)
//! - Codec v1: AES-256-CBC, hex
//! - Codec v2: AES-256-GCM, base64url segments, MAC-bound first frame
//!
//! ### Protocol Module ([`protocol`])
//! - `Message` JSON model and the device hello
//! - `Envelope` for middleware pipelines
//! - Codec negotiation (`ProtocolVersion`)
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              fleetlink-server                       │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   fleetlink-core  ◄──  fleetlink-transport          │
//! │   You are here                │                     │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │            fleetlink-common                         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL cryptographic code uses audited RustCrypto implementations
//! - ALL keys zeroize on drop
//! - Wire format changes break deployed firmware
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod crypto;
pub mod error;
pub mod protocol;

pub use crypto::{LegacyKey, MasterSecret, SymmetricKey};
pub use error::{CoreError, Result};
pub use protocol::{Envelope, Message, MessageType, Meta, Payload, ProtocolVersion};
