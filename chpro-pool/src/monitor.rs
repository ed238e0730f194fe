//! Pool Health Monitor Background Task
//!
//! Periodically pings every configured host and moves hosts between the
//! live and dead maps of the pool. The first cycle runs immediately after
//! the task starts.
//!
//! The task ends in one of two ways:
//!
//! - the shutdown watch flips to `true` (or its sender is dropped), returning
//!   the metrics snapshot
//! - a cycle finds no host answering, returning `PoolError::AllHostsDown`
//!
//! # Example
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(health_monitor_task(pool, Duration::from_secs(60), shutdown_rx));
//!
//! // Later, trigger shutdown
//! let _ = shutdown_tx.send(true);
//! let snapshot = handle.await??;
//! ```

use crate::pool::Pool;
use chpro_core::{HealthCycleReport, PoolResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// METRICS
// ============================================================================

/// Counters for health monitor activity.
#[derive(Debug, Default)]
pub struct HealthMonitorMetrics {
    /// Committed health cycles
    pub cycles: AtomicU64,

    /// Live → dead transitions
    pub hosts_went_down: AtomicU64,

    /// Dead → live transitions
    pub hosts_came_up: AtomicU64,

    /// Live hosts after the last committed cycle
    pub last_live_count: AtomicU64,
}

impl HealthMonitorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, report: &HealthCycleReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.hosts_went_down
            .fetch_add(report.went_down.len() as u64, Ordering::Relaxed);
        self.hosts_came_up
            .fetch_add(report.came_up.len() as u64, Ordering::Relaxed);
        self.last_live_count
            .store(report.live_count() as u64, Ordering::Relaxed);
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> HealthMonitorSnapshot {
        HealthMonitorSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            hosts_went_down: self.hosts_went_down.load(Ordering::Relaxed),
            hosts_came_up: self.hosts_came_up.load(Ordering::Relaxed),
            last_live_count: self.last_live_count.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of monitor metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthMonitorSnapshot {
    pub cycles: u64,
    pub hosts_went_down: u64,
    pub hosts_came_up: u64,
    pub last_live_count: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Run health cycles every `check_interval` until shutdown or total outage.
pub async fn health_monitor_task(
    pool: Arc<Pool>,
    check_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> PoolResult<HealthMonitorSnapshot> {
    let metrics = HealthMonitorMetrics::new();

    let mut ticker = interval(check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        check_interval_secs = check_interval.as_secs(),
        hosts = pool.configured_hosts().len(),
        "Health monitor started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Health monitor shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                match pool.check_health().await {
                    Ok(report) => metrics.record(&report),
                    Err(e) => {
                        tracing::error!(error = %e, "Health monitor stopping");
                        return Err(e);
                    }
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        hosts_went_down = snapshot.hosts_went_down,
        hosts_came_up = snapshot.hosts_came_up,
        "Health monitor completed"
    );

    Ok(snapshot)
}
