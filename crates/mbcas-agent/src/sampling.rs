// SPDX-License-Identifier: MIT
//! The sampling loop (spec §4.1, §5): once per `SAMPLING_INTERVAL` tick,
//! reads every live pod's cgroup, derives a [`DemandSample`], and folds it
//! into the shared [`DemandTracker`] via `mbcas_core::update_demand`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use mbcas_core::{DemandSample, PodId, SamplerConfig};
use tracing::{debug, warn};

use crate::cgroup::{self, CpuStat};
use crate::config::AgentConfig;
use crate::metrics;
use crate::pods::PodCache;
use crate::status::AgentStatus;
use crate::tracker::DemandTracker;

fn now_unix_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Per-pod usage-rate state carried between ticks by the loop itself —
/// single-writer, so a plain `HashMap` is correct here (unlike the shared
/// `DemandTracker`, which is read by the write loop concurrently).
struct PrevObservation {
    sample: DemandSample,
    usage_usec: u64,
}

/// `usage_milli`'s latest value per pod, shared with the write loop via a
/// `DashMap` rather than a mutex around the whole loop — the write loop only
/// ever reads the most recent value, never the loop's internal state.
pub type UsageMilliMap = Arc<DashMap<PodId, u64>>;

pub struct SamplingLoop {
    cfg: AgentConfig,
    sampler_cfg: SamplerConfig,
    tracker: std::sync::Arc<DemandTracker>,
    pods: PodCache,
    prev: HashMap<PodId, PrevObservation>,
    usage_milli: UsageMilliMap,
    status: std::sync::Arc<AgentStatus>,
}

impl SamplingLoop {
    pub fn new(
        cfg: AgentConfig,
        tracker: std::sync::Arc<DemandTracker>,
        pods: PodCache,
        usage_milli: UsageMilliMap,
        status: std::sync::Arc<AgentStatus>,
    ) -> Self {
        let sampler_cfg = SamplerConfig {
            max_consecutive_failures: cfg.max_consecutive_failures,
            ..SamplerConfig::default()
        };
        Self {
            cfg,
            sampler_cfg,
            tracker,
            pods,
            prev: HashMap::new(),
            usage_milli,
            status,
        }
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.cfg.sampling_interval);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&mut self) {
        let live = self.pods.live_pod_ids();
        metrics::PODS_TRACKED.set(self.tracker.len() as i64);

        for pod_id in &live {
            let Some(uid) = self.pods.uid_for(pod_id) else {
                continue;
            };
            let Some(dir) = cgroup::resolve_pod_cgroup(&self.cfg.cgroup_root, &uid) else {
                self.record_invalid(pod_id, "cgroup-not-found");
                continue;
            };

            let read_result = tokio::task::spawn_blocking(move || cgroup::read_cpu_stat(&dir)).await;

            match read_result {
                Ok(Ok(stat)) => self.record_valid(pod_id, stat),
                Ok(Err(err)) => {
                    warn!(pod_id = %pod_id, error = %err, "cgroup read failed");
                    self.record_invalid(pod_id, "read-error");
                }
                Err(join_err) => {
                    warn!(pod_id = %pod_id, error = %join_err, "cgroup read task panicked");
                    self.record_invalid(pod_id, "task-panic");
                }
            }
        }

        let ttl = self.cfg.stale_ttl;
        self.tracker.evict_stale(now_unix_ns(), ttl, &live);
        self.prev.retain(|id, _| live.contains(id));
        self.usage_milli.retain(|id, _| live.contains(id));
    }

    fn record_invalid(&mut self, pod_id: &PodId, reason: &'static str) {
        metrics::SAMPLES_TOTAL.with_label_values(&["false"]).inc();
        metrics::CGROUP_READ_FAILURES_TOTAL.with_label_values(&[reason]).inc();
        let sample = DemandSample {
            pod_id: pod_id.clone(),
            timestamp_unix_ns: now_unix_ns(),
            throttled_time_ns: 0,
            runnable_time_ns: 0,
            cpu_usage_micros: 0,
            sample_valid: false,
        };
        let raw = sample.raw_demand(self.prev.get(pod_id).map(|p| &p.sample));
        let cfg = self.sampler_cfg;
        self.tracker.with_state(pod_id, |state| {
            mbcas_core::update_demand(state, &sample, raw, &cfg);
        });
    }

    fn record_valid(&mut self, pod_id: &PodId, stat: CpuStat) {
        let now = now_unix_ns();
        let sample = DemandSample {
            pod_id: pod_id.clone(),
            timestamp_unix_ns: now,
            throttled_time_ns: stat.throttled_usec.saturating_mul(1000),
            runnable_time_ns: stat.usage_usec.saturating_mul(1000),
            cpu_usage_micros: stat.usage_usec,
            sample_valid: true,
        };

        let prev = self.prev.get(pod_id);
        let raw = sample.raw_demand(prev.map(|p| &p.sample));

        if let Some(prev) = prev {
            let dt_ns = now.saturating_sub(prev.sample.timestamp_unix_ns).max(1);
            let d_usage_usec = stat.usage_usec.saturating_sub(prev.usage_usec);
            // milli-cores = (cpu-usec consumed / wall-usec elapsed) * 1000.
            let dt_usec = dt_ns / 1000;
            if dt_usec > 0 {
                let milli = (d_usage_usec as f64 / dt_usec as f64 * 1000.0).round() as u64;
                self.usage_milli.insert(pod_id.clone(), milli);
            }
        }

        metrics::SAMPLES_TOTAL.with_label_values(&["true"]).inc();
        self.status.mark_sample();
        let cfg = self.sampler_cfg;
        self.tracker.with_state(pod_id, |state| {
            mbcas_core::update_demand(state, &sample, raw, &cfg);
        });
        debug!(pod_id = %pod_id, raw_demand = raw, "sampled");

        self.prev.insert(
            pod_id.clone(),
            PrevObservation {
                sample,
                usage_usec: stat.usage_usec,
            },
        );
    }
}
