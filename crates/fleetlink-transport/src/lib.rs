// ============================================
// File: crates/fleetlink-transport/src/lib.rs
// ============================================
//! # FleetLink Transport - Connection Layer
//!
//! ## Creation Reason
//! Provides the per-device connection: a text-framed socket plus ordered
//! middleware pipelines, with request/reply matching and serialized
//! commands on top.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `WireSocket` socket abstraction
//! - [`ws`]: WebSocket implementation of `WireSocket`
//! - [`mock`]: In-memory socket for tests
//! - [`middleware`]: Pipeline stage trait
//! - [`connection`]: `Connection` and its lifecycle
//! - [`json`]: Text ↔ `Message` stage
//! - [`error`]: Connection error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              fleetlink-server                       │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   fleetlink-core      fleetlink-transport           │
//! │                        You are here ◄──             │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │            fleetlink-common                         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//!   Device ──ws──► WsSocket ──► Connection::run
//!                                   │
//!                        codec ─► json ─► router ─► request waiters
//!                                                └► subscribers
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always go through `WireSocket` so connections stay testable
//! - Codec stages live in the server crate; this crate knows nothing
//!   about keys
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod connection;
pub mod error;
pub mod json;
pub mod middleware;
pub mod mock;
pub mod traits;
pub mod ws;

// Re-export primary types
pub use connection::{
    Connection, ConnectionContext, ConnectionOptions, ConnectionState, WeakConnection,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use error::{ConnectionError, Result};
pub use json::JsonStage;
pub use middleware::{Capabilities, Middleware};
pub use mock::MockSocket;
pub use traits::WireSocket;
pub use ws::WsSocket;
