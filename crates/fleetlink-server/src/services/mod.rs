// ============================================
// File: crates/fleetlink-server/src/services/mod.rs
// ============================================
//! # Server Services
//!
//! ## Creation Reason
//! Long-lived components shared by all device connections, separated
//! from the codec and transport concerns.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`guard`]: Admission control for new sockets
//! - [`scheduler`]: Heap-scheduled periodic device actions
//! - [`event_queue`]: Per-device ordered event processing
//! - [`store`]: deviceId → connection registry
//! - [`bootstrap`]: Hello handling, registration and teardown
//! - [`directory`]: Device identity resolution
//! - [`settings`]: Interval and device settings providers
//!
//! ## Service Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Service Layer                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐   ┌─────────────────────────────────┐ │
//! │  │    Bootstrap    │──►│          DeviceStore            │ │
//! │  │                 │   │  - add evicts stale connection  │ │
//! │  │  - Directory    │   │  - remove_if on close           │ │
//! │  │  - Settings     │   └─────────────────────────────────┘ │
//! │  └────────┬────────┘                                       │
//! │           │            ┌─────────────────────────────────┐ │
//! │           └───────────►│       PeriodicScheduler         │ │
//! │                        │  - one timer, bounded workers   │ │
//! │                        └─────────────────────────────────┘ │
//! │                                                             │
//! │  ┌─────────────────┐   ┌─────────────────────────────────┐ │
//! │  │      Guard      │   │       DeviceEventQueue          │ │
//! │  │  - gates sockets│   │  - fed by the message router    │ │
//! │  └─────────────────┘   └─────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Components are injected by handle; there is no global state
//! - Scheduler and event queue keep no relative order for one device
//! - Locks are never held across `.await`
//!
//! ## Last Modified
//! v0.1.0 - Initial services structure

pub mod bootstrap;
pub mod directory;
pub mod event_queue;
pub mod guard;
pub mod scheduler;
pub mod settings;
pub mod store;

// Re-export primary types
pub use bootstrap::{Bootstrap, BootstrapStage};
pub use directory::{DeviceDirectory, MacDirectory};
pub use event_queue::{DeviceEvent, DeviceEventQueue, EventHandler};
pub use guard::{Guard, HealthStatus};
pub use scheduler::{ActionId, PeriodicScheduler};
pub use settings::{ConfigSettings, DeviceSettings, IntervalProvider, SettingsProvider};
pub use store::{DeviceRecord, DeviceStore};
