// ============================================
// File: crates/fleetlink-server/src/services/guard.rs
// ============================================
//! # Admission Guard
//!
//! ## Creation Reason
//! Protects devices that are already connected from a reconnect storm.
//! New sockets are admitted only while the process is healthy.
//!
//! ## Main Functionality
//! - `start`: Periodic health sampler (event-loop lag, memory)
//! - `check`: Pure evaluation of the latest snapshot against ceilings
//! - `verify_client`: Admission decision; rejections are delayed
//! - `status` / `record`: Read or overwrite the snapshot
//!
//! ## Admission Flow
//! ```text
//! new socket ──► check() ──ok──► accept
//!                   │
//!                   └─unavailable──► wait reject_delay ──► 503
//!                                    (cancelled on shutdown)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Event-loop lag is measured as timer overshoot of the sampler
//! - The guard never sees application messages
//! - "Heap" is reported as process virtual memory
//!
//! ## Last Modified
//! v0.1.0 - Initial admission guard

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fleetlink_common::time::unix_timestamp_millis;
use parking_lot::RwLock;
use serde::Serialize;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::GuardConfig;
use crate::error::{Result, ServerError};

const BYTES_PER_MB: u64 = 1024 * 1024;

// ============================================
// HealthStatus
// ============================================

/// Snapshot of process health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    /// Sampler timer overshoot in milliseconds.
    pub event_loop_delay_ms: u64,
    /// Process virtual memory in MiB.
    pub virtual_memory_mb: u64,
    /// Process resident memory in MiB.
    pub resident_memory_mb: u64,
    /// Sample time in Unix milliseconds (0 = never sampled).
    pub sampled_at: u64,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loop_delay={}ms virt={}MB rss={}MB",
            self.event_loop_delay_ms, self.virtual_memory_mb, self.resident_memory_mb
        )
    }
}

// ============================================
// Guard
// ============================================

/// Admission controller.
pub struct Guard {
    config: GuardConfig,
    status: RwLock<HealthStatus>,
    shutdown: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl Guard {
    /// Creates a guard with an empty snapshot.
    #[must_use]
    pub fn new(config: GuardConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            status: RwLock::new(HealthStatus::default()),
            shutdown: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Starts the health sampler.
    ///
    /// Returns `None` when sampling is disabled (`check_interval_ms = 0`).
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let interval = self.config.check_interval()?;
        let guard = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(interval_ms = self.config.check_interval_ms, "Guard sampler started");

        Some(tokio::spawn(async move {
            let mut system = System::new();
            let pid = sysinfo::get_current_pid().ok();

            loop {
                let started = Instant::now();
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    () = tokio::time::sleep(interval) => {}
                }

                let lag = started.elapsed().saturating_sub(interval);
                let (virtual_memory_mb, resident_memory_mb) = pid
                    .and_then(|pid| {
                        system.refresh_processes_specifics(
                            ProcessesToUpdate::Some(&[pid]),
                            true,
                            ProcessRefreshKind::nothing().with_memory(),
                        );
                        system.process(pid).map(|p| {
                            (p.virtual_memory() / BYTES_PER_MB, p.memory() / BYTES_PER_MB)
                        })
                    })
                    .unwrap_or_default();

                guard.record(HealthStatus {
                    event_loop_delay_ms: u64::try_from(lag.as_millis()).unwrap_or(u64::MAX),
                    virtual_memory_mb,
                    resident_memory_mb,
                    sampled_at: unix_timestamp_millis(),
                });
            }

            debug!("Guard sampler exiting");
        }))
    }

    /// Returns the latest snapshot.
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        *self.status.read()
    }

    /// Replaces the snapshot.
    pub fn record(&self, status: HealthStatus) {
        *self.status.write() = status;
    }

    /// Evaluates the latest snapshot against the configured ceilings.
    ///
    /// # Errors
    /// `ServerUnavailable` carrying the snapshot if any ceiling is exceeded.
    pub fn check(&self) -> Result<()> {
        let status = self.status();
        let over = |value: u64, ceiling: u64| ceiling != 0 && value > ceiling;

        if over(status.event_loop_delay_ms, self.config.max_event_loop_delay_ms)
            || over(status.virtual_memory_mb, self.config.max_virtual_memory_mb)
            || over(status.resident_memory_mb, self.config.max_resident_memory_mb)
        {
            return Err(ServerError::ServerUnavailable { status });
        }
        Ok(())
    }

    /// Decides whether a new client may connect.
    ///
    /// A rejection completes only after `reject_delay`, or immediately
    /// once the guard is shut down.
    ///
    /// # Errors
    /// `ServerUnavailable` if the client is rejected.
    pub async fn verify_client(&self) -> Result<()> {
        let Err(error) = self.check() else {
            return Ok(());
        };

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(error);
        }

        warn!(
            error = %error,
            delay_secs = self.config.reject_delay_secs,
            "Rejecting client"
        );

        tokio::select! {
            _ = shutdown_rx.recv() => {}
            () = tokio::time::sleep(self.config.reject_delay()) => {}
        }
        Err(error)
    }

    /// Stops the sampler and releases pending rejections.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn guard(max_delay: u64) -> Guard {
        Guard::new(GuardConfig {
            max_event_loop_delay_ms: max_delay,
            ..GuardConfig::default()
        })
    }

    fn with_delay(ms: u64) -> HealthStatus {
        HealthStatus {
            event_loop_delay_ms: ms,
            ..HealthStatus::default()
        }
    }

    #[test]
    fn test_check_event_loop_ceiling() {
        let guard = guard(500);

        guard.record(with_delay(600));
        match guard.check() {
            Err(ServerError::ServerUnavailable { status }) => assert_eq!(status.event_loop_delay_ms, 600),
            other => panic!("unexpected: {other:?}"),
        }

        guard.record(with_delay(100));
        assert!(guard.check().is_ok());
    }

    #[test]
    fn test_zero_ceiling_is_unlimited() {
        let guard = guard(0);
        guard.record(HealthStatus {
            event_loop_delay_ms: 100_000,
            virtual_memory_mb: 1 << 20,
            resident_memory_mb: 1 << 20,
            sampled_at: 1,
        });
        assert!(guard.check().is_ok());
    }

    #[test]
    fn test_memory_ceiling() {
        let guard = Guard::new(GuardConfig {
            max_resident_memory_mb: 512,
            ..GuardConfig::default()
        });
        guard.record(HealthStatus {
            resident_memory_mb: 513,
            ..HealthStatus::default()
        });
        assert!(guard.check().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_delayed() {
        let guard = Arc::new(guard(500));
        guard.record(with_delay(600));

        let started = Instant::now();
        let task = {
            let guard = guard.clone();
            tokio::spawn(async move { guard.verify_client().await })
        };

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert!(!task.is_finished());

        let result = task.await.unwrap();
        assert!(matches!(result, Err(ServerError::ServerUnavailable { .. })));
        assert!(started.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_is_immediate_when_healthy() {
        let guard = guard(500);
        guard.record(with_delay(100));

        let started = Instant::now();
        guard.verify_client().await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_rejection_delay() {
        let guard = Arc::new(guard(500));
        guard.record(with_delay(600));

        let task = {
            let guard = guard.clone();
            tokio::spawn(async move { guard.verify_client().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        guard.shutdown();

        let started = Instant::now();
        assert!(task.await.unwrap().is_err());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_records_status() {
        let guard = Arc::new(Guard::new(GuardConfig {
            check_interval_ms: 100,
            ..GuardConfig::default()
        }));
        let handle = guard.start().unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(guard.status().sampled_at > 0);

        guard.shutdown();
        handle.await.unwrap();
    }

    #[test]
    fn test_disabled_sampler() {
        let guard = Arc::new(Guard::new(GuardConfig {
            check_interval_ms: 0,
            ..GuardConfig::default()
        }));
        assert!(guard.start().is_none());
    }
}
