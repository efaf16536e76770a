// ============================================
// File: crates/fleetlink-server/src/handlers/mod.rs
// ============================================
//! # Message Handlers
//!
//! ## Creation Reason
//! Connects the per-connection pipeline to the server's device-level
//! processing.
//!
//! ### Submodules
//! - [`router`]: Forwards device events into the event queue
//!
//! ## Data Flow
//! ```text
//! Device → Server:
//!   1. Codec decrypts the frame
//!   2. JSON stage parses the message
//!   3. Bootstrap consumes the hello
//!   4. Router hands events to the device's queue
//!   5. Everything else is matched to pending requests
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial handlers structure

pub mod router;

pub use router::MessageRouter;
