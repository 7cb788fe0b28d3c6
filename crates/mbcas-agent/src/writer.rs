// SPDX-License-Identifier: MIT
//! The write loop (spec §4.2, §4.3, §6): once per `WRITE_INTERVAL` tick,
//! extracts parameters for every live pod, runs the allocator, and
//! server-side-applies each pod's `AllocationRecord`. Only publishes a
//! change when it clears `MIN_CHANGE_PERCENT` (spec §4.3 "Failure
//! semantics" / hysteresis), except during the startup grace period, when
//! an allocation may only increase (never shrink a pod before the Agent has
//! observed it for `STARTUP_GRACE_PERIOD`).

use std::collections::BTreeMap;
use std::time::Instant;

use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use mbcas_core::{
    allocate, extract_params, quantity, AllocationRecord, AllocationRecordSpec,
    AllocatorConfig, ExtractorConfig, PodAllocation, PodId, PodParams,
};
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::error::OrchestratorError;
use crate::metrics;
use crate::pods::PodCache;
use crate::sampling::UsageMilliMap;
use crate::status::AgentStatus;
use crate::tracker::DemandTracker;

const FIELD_MANAGER: &str = "mbcas-agentd";

pub struct WriteLoop {
    cfg: AgentConfig,
    allocator_cfg: AllocatorConfig,
    extractor_cfg: ExtractorConfig,
    client: Client,
    tracker: std::sync::Arc<DemandTracker>,
    pods: PodCache,
    usage_milli: UsageMilliMap,
    started_at: Instant,
    last_published: BTreeMap<PodId, PodAllocation>,
    status: std::sync::Arc<AgentStatus>,
}

impl WriteLoop {
    pub fn new(
        cfg: AgentConfig,
        client: Client,
        tracker: std::sync::Arc<DemandTracker>,
        pods: PodCache,
        usage_milli: UsageMilliMap,
        status: std::sync::Arc<AgentStatus>,
    ) -> Self {
        let extractor_cfg = ExtractorConfig {
            baseline_milli: cfg.baseline_cpu_milli,
            ..ExtractorConfig::new(cfg.node_capacity_milli)
        };
        let allocator_cfg = AllocatorConfig {
            need_headroom: cfg.need_headroom_factor,
            want_headroom: cfg.want_headroom_factor,
            max_demand_multiplier: cfg.max_demand_multiplier,
            ..AllocatorConfig::default()
        };
        Self {
            cfg,
            allocator_cfg,
            extractor_cfg,
            client,
            tracker,
            pods,
            usage_milli,
            started_at: Instant::now(),
            last_published: BTreeMap::new(),
            status,
        }
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.cfg.write_interval);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&mut self) {
        let live = self.pods.live_pod_ids();
        let mut inputs: BTreeMap<PodId, PodParams> = BTreeMap::new();

        for pod_id in &live {
            // Guaranteed-QoS pods still get a record: the Controller is the
            // sole enforcement point for that exclusion (spec §4.2, §4.4).
            let Some(facts) = self.pods.facts_for(pod_id) else {
                continue;
            };
            let demand = self.tracker.get(pod_id).map(|s| s.smoothed_demand).unwrap_or(0.0);
            let usage_milli = self.usage_milli.get(pod_id).map(|e| *e).unwrap_or(0);
            let params = extract_params(&self.extractor_cfg, &facts, demand, usage_milli);
            inputs.insert(pod_id.clone(), params);
        }

        if inputs.is_empty() {
            return;
        }

        let effective_capacity_milli = (self.cfg.node_capacity_milli as f64
            * (1.0 - self.cfg.system_reserve_percent / 100.0))
            .max(0.0) as u64;
        let result = allocate(effective_capacity_milli, &inputs, &self.allocator_cfg);
        metrics::ALLOCATION_MODE.set(match result.mode {
            mbcas_core::Mode::Uncongested => 0,
            mbcas_core::Mode::Congested => 1,
            mbcas_core::Mode::Overloaded => 2,
        });

        let in_grace_period = self.started_at.elapsed() < self.cfg.startup_grace_period;

        for (pod_id, alloc) in &result.allocations {
            if !self.should_publish(pod_id, alloc, in_grace_period) {
                continue;
            }
            match self.publish(pod_id, alloc).await {
                Ok(()) => {
                    metrics::WRITES_TOTAL.with_label_values(&["ok"]).inc();
                    self.status.mark_write();
                    self.last_published.insert(pod_id.clone(), *alloc);
                }
                Err(err) => {
                    metrics::WRITES_TOTAL.with_label_values(&["error"]).inc();
                    warn!(pod_id = %pod_id, error = %err, "failed to publish allocation record");
                }
            }
        }
    }

    fn should_publish(&self, pod_id: &PodId, alloc: &PodAllocation, in_grace_period: bool) -> bool {
        let Some(prev) = self.last_published.get(pod_id) else {
            return true;
        };
        if in_grace_period
            && (alloc.limit_milli < prev.limit_milli || alloc.request_milli < prev.request_milli)
        {
            return false;
        }
        let base = prev.limit_milli.max(1) as f64;
        let delta_percent = (alloc.limit_milli as f64 - prev.limit_milli as f64).abs() / base * 100.0;
        delta_percent >= self.cfg.min_change_percent
    }

    async fn publish(&self, pod_id: &PodId, alloc: &PodAllocation) -> Result<(), OrchestratorError> {
        let namespace = self.pods.namespace_for(pod_id).unwrap_or_else(|| "default".to_string());
        let api: Api<AllocationRecord> = Api::namespaced(self.client.clone(), &namespace);

        let record = AllocationRecord::new(
            pod_id,
            AllocationRecordSpec {
                namespace: namespace.clone(),
                pod_name: pod_id.clone(),
                desired_cpu_request: quantity::format_millicores(alloc.request_milli),
                desired_cpu_limit: quantity::format_millicores(alloc.limit_milli),
            },
        );

        let patch = Patch::Apply(&record);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(pod_id, &params, &patch).await?;
        info!(
            pod_id = %pod_id,
            request = alloc.request_milli,
            limit = alloc.limit_milli,
            "published allocation record"
        );
        Ok(())
    }
}
