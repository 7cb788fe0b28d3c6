// SPDX-License-Identifier: MIT
//! Shared health/readiness state (spec §6), the Controller's counterpart to
//! the Agent's `status.rs`: a few atomics updated by the reconciler and read
//! back by the health server.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

fn now_unix_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

pub struct ControllerStatus {
    resize_subresource_available: AtomicBool,
    last_reconcile_unix_secs: AtomicU64,
    started_at: Instant,
    start_unix_secs: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct StatusSnapshot {
    pub resize_subresource_available: bool,
    pub has_reconciled: bool,
    pub last_reconcile_unix_secs: Option<u64>,
    pub start_unix_secs: u64,
    pub uptime_secs: u64,
}

impl ControllerStatus {
    pub fn new(resize_subresource_available: bool) -> Self {
        Self {
            resize_subresource_available: AtomicBool::new(resize_subresource_available),
            last_reconcile_unix_secs: AtomicU64::new(0),
            started_at: Instant::now(),
            start_unix_secs: now_unix_secs(),
        }
    }

    pub fn mark_reconcile(&self) {
        self.last_reconcile_unix_secs.store(now_unix_secs(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let last = self.last_reconcile_unix_secs.load(Ordering::Relaxed);
        StatusSnapshot {
            resize_subresource_available: self.resize_subresource_available.load(Ordering::Relaxed),
            has_reconciled: last > 0,
            last_reconcile_unix_secs: (last > 0).then_some(last),
            start_unix_secs: self.start_unix_secs,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_until_first_reconcile() {
        let status = ControllerStatus::new(true);
        assert!(!status.snapshot().has_reconciled);
        status.mark_reconcile();
        assert!(status.snapshot().has_reconciled);
    }
}
