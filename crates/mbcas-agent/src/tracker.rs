// SPDX-License-Identifier: MIT
//! Shared `map<PodId, DemandState>` (spec §5). `DashMap` gives short,
//! per-shard critical sections without a single global lock, the idiomatic
//! substitute for "a single reader-preferring lock" under many pods —
//! the teacher already carries `dashmap` for its high-concurrency state.

use std::time::Duration;

use dashmap::DashMap;
use mbcas_core::{DemandState, PodId};
use tracing::debug;

#[derive(Default)]
pub struct DemandTracker {
    states: DashMap<PodId, DemandState>,
}

impl DemandTracker {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// Run `f` against the pod's state, creating it on first observation.
    pub fn with_state<R>(&self, pod_id: &PodId, f: impl FnOnce(&mut DemandState) -> R) -> R {
        let mut entry = self.states.entry(pod_id.clone()).or_default();
        f(&mut entry)
    }

    pub fn get(&self, pod_id: &PodId) -> Option<DemandState> {
        self.states.get(pod_id).map(|e| e.clone())
    }

    pub fn remove(&self, pod_id: &PodId) {
        self.states.remove(pod_id);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Evict pods not observed within `ttl`, or no longer in `live_pods`
    /// (destroyed when the pod disappears, per spec §3 `DemandState`
    /// lifetime).
    pub fn evict_stale(&self, now_unix_ns: u64, ttl: Duration, live_pods: &[PodId]) {
        let ttl_ns = ttl.as_nanos() as u64;
        let mut to_remove = Vec::new();
        for entry in self.states.iter() {
            let pod_id = entry.key();
            let stale = now_unix_ns.saturating_sub(entry.value().last_observed_unix_ns) > ttl_ns;
            let vanished = !live_pods.contains(pod_id);
            if stale || vanished {
                to_remove.push(pod_id.clone());
            }
        }
        for pod_id in to_remove {
            debug!(pod_id = %pod_id, "evicting stale demand state");
            self.states.remove(&pod_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_state_on_first_observation() {
        let tracker = DemandTracker::new();
        tracker.with_state(&"pod-a".to_string(), |s| {
            s.smoothed_demand = 0.5;
        });
        assert_eq!(tracker.get(&"pod-a".to_string()).unwrap().smoothed_demand, 0.5);
    }

    #[test]
    fn evicts_vanished_pods() {
        let tracker = DemandTracker::new();
        tracker.with_state(&"pod-a".to_string(), |s| s.last_observed_unix_ns = 1);
        tracker.evict_stale(1, Duration::from_secs(60), &[]);
        assert!(tracker.get(&"pod-a".to_string()).is_none());
    }

    #[test]
    fn keeps_fresh_live_pods() {
        let tracker = DemandTracker::new();
        tracker.with_state(&"pod-a".to_string(), |s| s.last_observed_unix_ns = 1_000_000_000);
        tracker.evict_stale(1_000_000_000, Duration::from_secs(60), &["pod-a".to_string()]);
        assert!(tracker.get(&"pod-a".to_string()).is_some());
    }
}
