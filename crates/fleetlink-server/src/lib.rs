// ============================================
// File: crates/fleetlink-server/src/lib.rs
// ============================================
//! # FleetLink Server Library
//!
//! ## Creation Reason
//! Device communication server: keeps long-lived, encrypted WebSocket
//! sessions with network devices, polls them periodically and processes
//! their events in per-device order.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: Server configuration management
//! - [`server`]: Main server orchestration
//! - [`codec`]: v1/v2 wire encryption stages and device keys
//! - [`services`]: Guard, scheduler, event queue, store, bootstrap
//! - [`handlers`]: Pipeline → event queue routing
//! - [`error`]: Server-specific error types
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        FleetLink Server                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐  │
//! │  │   Config    │────►│   Server    │────►│     Guard       │  │
//! │  │  Manager    │     │ Orchestrator│     │  (admission)    │  │
//! │  └─────────────┘     └──────┬──────┘     └─────────────────┘  │
//! │                             │ per socket                       │
//! │                             ▼                                  │
//! │  ┌──────────────────────────────────────────────────────────┐ │
//! │  │ Connection: codec ─► json ─► bootstrap ─► router          │ │
//! │  └───────────────────────────┬──────────────────┬───────────┘ │
//! │                              ▼                  ▼             │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     │
//! │  │ DeviceStore │     │  Scheduler  │     │ Event Queue │     │
//! │  └─────────────┘     └─────────────┘     └─────────────┘     │
//! │                                                               │
//! ├───────────────────────────────────────────────────────────────┤
//! │                     Transport Layer                           │
//! │  ┌─────────────────────┐     ┌─────────────────────────────┐ │
//! │  │    WebSocket        │     │       Key Repository        │ │
//! │  │  (device frames)    │     │     (v2 device keys)        │ │
//! │  └─────────────────────┘     └─────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Configuration changes require restart (no hot-reload)
//! - The in-memory key store loses issued keys on restart; devices then
//!   go through key issuance again
//! - Logging is built-in via `tracing`
//!
//! ## Last Modified
//! v0.1.0 - Initial server library

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod services;

// Re-export primary types
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use server::{DeviceSession, Server, Services};
