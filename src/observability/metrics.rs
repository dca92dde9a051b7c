//! Per-bridge counters
//!
//! Every counter is a relaxed atomic; a snapshot is a consistent-enough view
//! for logging and status output, not a transactional read.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug)]
pub struct BridgeMetrics {
    // Outbound
    downlinks_queued: AtomicU64,
    downlinks_sent: AtomicU64,
    downlinks_failed: AtomicU64,
    downlinks_dropped_at_stop: AtomicU64,
    drain_cycles: AtomicU64,

    // Inbound
    uplinks_received: AtomicU64,
    uplinks_dispatched: AtomicU64,
    uplinks_rejected: AtomicU64,
    handler_failures: AtomicU64,

    created_at: u64,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self {
            downlinks_queued: AtomicU64::new(0),
            downlinks_sent: AtomicU64::new(0),
            downlinks_failed: AtomicU64::new(0),
            downlinks_dropped_at_stop: AtomicU64::new(0),
            drain_cycles: AtomicU64::new(0),
            uplinks_received: AtomicU64::new(0),
            uplinks_dispatched: AtomicU64::new(0),
            uplinks_rejected: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            created_at: current_timestamp(),
        }
    }

    pub fn downlink_queued(&self) {
        self.downlinks_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn downlink_sent(&self) {
        self.downlinks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn downlink_failed(&self) {
        self.downlinks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn downlinks_dropped(&self, count: u64) {
        self.downlinks_dropped_at_stop
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn drain_cycle(&self) {
        self.drain_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uplink_received(&self) {
        self.uplinks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uplink_dispatched(&self) {
        self.uplinks_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uplink_rejected(&self) {
        self.uplinks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_failed(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        MetricsSnapshot {
            downlinks: DownlinkMetrics {
                queued: self.downlinks_queued.load(Ordering::Relaxed),
                sent: self.downlinks_sent.load(Ordering::Relaxed),
                failed: self.downlinks_failed.load(Ordering::Relaxed),
                dropped_at_stop: self.downlinks_dropped_at_stop.load(Ordering::Relaxed),
                drain_cycles: self.drain_cycles.load(Ordering::Relaxed),
            },
            uplinks: UplinkMetrics {
                received: self.uplinks_received.load(Ordering::Relaxed),
                dispatched: self.uplinks_dispatched.load(Ordering::Relaxed),
                rejected: self.uplinks_rejected.load(Ordering::Relaxed),
                handler_failures: self.handler_failures.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.created_at),
            timestamp: now,
        }
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub downlinks: DownlinkMetrics,
    pub uplinks: UplinkMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownlinkMetrics {
    pub queued: u64,
    pub sent: u64,
    pub failed: u64,
    pub dropped_at_stop: u64,
    pub drain_cycles: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UplinkMetrics {
    pub received: u64,
    /// Uplinks handed to at least one handler
    pub dispatched: u64,
    /// Uplinks dropped because the decoded payload was invalid
    pub rejected: u64,
    pub handler_failures: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
