// ============================================
// File: crates/fleetlink-server/src/services/event_queue.rs
// ============================================
//! # Device Event Queue
//!
//! ## Creation Reason
//! Devices report many event types (stats, alarms, config changes).
//! Handling must be strictly ordered per device, fully parallel across
//! devices, and must not pile up stale duplicates.
//!
//! ## Main Functionality
//! - `add`: Enqueue an event; a type already pending only has its
//!   payload replaced
//! - `register_handler` / `register_stream_handler` / `register_handlers`
//! - `pending_devices`: Devices with a live queue
//!
//! ## Per-Device Mailbox
//! ```text
//! add(stats#1) add(alarm) add(stats#2)
//!
//!   order:    [stats, alarm]
//!   payloads: {stats: #2, alarm: ...}
//!
//!   worker: stats(#2) ──► alarm ──► (empty: queue removed)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - One worker task per device with pending events, none for idle ones
//! - The queue is removed under the same lock `add` uses, so an event
//!   can never land in a queue whose worker already exited
//! - Handler failures are logged and never stop the worker
//!
//! ## Last Modified
//! v0.1.0 - Initial event queue

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use fleetlink_common::DeviceId;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, error, trace, warn};

// ============================================
// Types
// ============================================

/// An event reported by a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    /// Reporting device.
    pub device_id: DeviceId,
    /// Event type, used for handler lookup and coalescing.
    pub event_type: String,
    /// Event payload.
    pub payload: Value,
}

impl DeviceEvent {
    /// Creates an event.
    pub fn new(device_id: DeviceId, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            device_id,
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Normalized handler: every registration style becomes this.
pub type EventHandler = Arc<dyn Fn(DeviceEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Default)]
struct DeviceQueue {
    order: VecDeque<String>,
    payloads: HashMap<String, Value>,
}

struct Inner {
    handlers: RwLock<HashMap<String, EventHandler>>,
    queues: Mutex<HashMap<DeviceId, DeviceQueue>>,
}

// ============================================
// DeviceEventQueue
// ============================================

/// Per-device ordered, type-coalescing event mailbox.
#[derive(Clone)]
pub struct DeviceEventQueue {
    inner: Arc<Inner>,
}

impl DeviceEventQueue {
    /// Creates an empty queue with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                queues: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers an async handler for an event type, replacing any
    /// previous one.
    pub fn register_handler<F, Fut>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(DeviceEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |event: DeviceEvent| handler(event).boxed());
        self.insert_handler(event_type.into(), handler);
    }

    /// Registers a handler producing a stream; the event completes once
    /// the stream ends. The first `Err` item fails the event.
    pub fn register_stream_handler<F, S, T>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(DeviceEvent) -> S + Send + Sync + 'static,
        S: Stream<Item = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |event: DeviceEvent| {
            let stream = handler(event);
            async move {
                let mut stream = Box::pin(stream);
                while let Some(item) = stream.next().await {
                    item?;
                }
                anyhow::Ok(())
            }
            .boxed()
        });
        self.insert_handler(event_type.into(), handler);
    }

    /// Registers several already-normalized handlers.
    pub fn register_handlers<I, K>(&self, handlers: I)
    where
        I: IntoIterator<Item = (K, EventHandler)>,
        K: Into<String>,
    {
        for (event_type, handler) in handlers {
            self.insert_handler(event_type.into(), handler);
        }
    }

    fn insert_handler(&self, event_type: String, handler: EventHandler) {
        debug!(event_type = %event_type, "Event handler registered");
        self.inner.handlers.write().insert(event_type, handler);
    }

    /// Adds an event.
    ///
    /// Starts a worker if the device had no pending events. If the type
    /// is already pending, only its payload is replaced.
    pub fn add(&self, event: DeviceEvent) {
        let DeviceEvent {
            device_id,
            event_type,
            payload,
        } = event;

        let mut queues = self.inner.queues.lock();
        let start_worker = !queues.contains_key(&device_id);
        let queue = queues.entry(device_id.clone()).or_default();

        if queue.payloads.insert(event_type.clone(), payload).is_none() {
            queue.order.push_back(event_type);
        } else {
            trace!(device_id = %device_id, event_type = %event_type, "Coalesced pending event");
        }
        drop(queues);

        if start_worker {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(Self::drain(inner, device_id));
        }
    }

    /// Devices that currently have pending or in-flight events.
    #[must_use]
    pub fn pending_devices(&self) -> Vec<DeviceId> {
        self.inner.queues.lock().keys().cloned().collect()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.read().len()
    }

    async fn drain(inner: Arc<Inner>, device_id: DeviceId) {
        loop {
            let next = {
                let mut queues = inner.queues.lock();
                let Some(queue) = queues.get_mut(&device_id) else {
                    return;
                };
                match queue.order.pop_front() {
                    Some(event_type) => {
                        let payload = queue.payloads.remove(&event_type).unwrap_or(Value::Null);
                        Some((event_type, payload))
                    }
                    None => {
                        queues.remove(&device_id);
                        None
                    }
                }
            };
            let Some((event_type, payload)) = next else {
                trace!(device_id = %device_id, "Event queue drained");
                return;
            };

            let handler = inner.handlers.read().get(&event_type).cloned();
            let Some(handler) = handler else {
                warn!(device_id = %device_id, event_type = %event_type, "No handler for event");
                continue;
            };

            let event = DeviceEvent {
                device_id: device_id.clone(),
                event_type: event_type.clone(),
                payload,
            };
            // A panic counts as a failed event; the worker keeps draining
            match AssertUnwindSafe(async move { handler(event).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => trace!(device_id = %device_id, event_type = %event_type, "Event handled"),
                Ok(Err(e)) => error!(
                    device_id = %device_id,
                    event_type = %event_type,
                    error = %e,
                    "Event handler failed"
                ),
                Err(panic) => error!(
                    device_id = %device_id,
                    event_type = %event_type,
                    panic = panic_message(panic.as_ref()),
                    "Event handler panicked"
                ),
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

impl Default for DeviceEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeviceEventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEventQueue")
            .field("handlers", &self.handler_count())
            .field("pending_devices", &self.inner.queues.lock().len())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
