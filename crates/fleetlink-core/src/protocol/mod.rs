// ============================================
// File: crates/fleetlink-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines the application layer spoken with devices once a frame has
//! been decrypted, and the codec negotiation.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`messages`]: `Message`, `MessageType`, `DeviceHello`
//! - [`envelope`]: `Envelope`/`Payload`/`Meta` carried through pipelines
//! - [`codec`]: JSON encoding of messages
//! - [`version`]: Codec negotiation (`v1`/`v2`)
//!
//! ## Session Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Device ── HTTP upgrade (x-device-protocol: v2) ──► Server  │
//! │  Device ── event "connect" {mac, model} ──────────► Server  │
//! │  Device ◄── event "key" (first contact only) ─────── Server │
//! │                                                             │
//! │  Device ══ event / rpc reply / cmd reply ═════════ Server   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod codec;
pub mod envelope;
pub mod messages;
pub mod version;

pub use codec::{Codec, JsonCodec};
pub use envelope::{Envelope, Meta, Payload};
pub use messages::{generate_message_id, DeviceHello, Message, MessageType, HELLO_EVENT, KEY_EVENT};
pub use version::ProtocolVersion;
