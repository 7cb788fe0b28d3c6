// SPDX-License-Identifier: MIT
//! Prometheus metrics (spec §6 `/metrics`). Global registry + gauges/counters
//! via `lazy_static`, the teacher's own pattern in
//! `runtime/turbo_validator.rs`'s `GLOBAL_TURBO_METRICS`, but backed by the
//! real `prometheus` crate's `Registry`/`TextEncoder` instead of hand-rolled
//! string formatting.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static::lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref PODS_TRACKED: IntGauge = IntGauge::new(
        "mbcas_agent_pods_tracked", "Number of pods with live demand state"
    ).unwrap();

    pub static ref SAMPLES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("mbcas_agent_samples_total", "Sampling attempts by validity"),
        &["valid"],
    ).unwrap();

    pub static ref WRITES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("mbcas_agent_writes_total", "AllocationRecord writes by outcome"),
        &["outcome"],
    ).unwrap();

    pub static ref CGROUP_READ_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("mbcas_agent_cgroup_read_failures_total", "Cgroup read failures by pod"),
        &["reason"],
    ).unwrap();

    pub static ref ALLOCATION_MODE: IntGauge = IntGauge::new(
        "mbcas_agent_allocation_mode", "Last allocator mode (0=uncongested,1=congested,2=overloaded)"
    ).unwrap();
}

/// Register every collector once, at startup. Idempotent re-registration is
/// a programmer error, so this panics rather than silently dropping metrics.
pub fn register_all() {
    REGISTRY
        .register(Box::new(PODS_TRACKED.clone()))
        .expect("register PODS_TRACKED");
    REGISTRY
        .register(Box::new(SAMPLES_TOTAL.clone()))
        .expect("register SAMPLES_TOTAL");
    REGISTRY
        .register(Box::new(WRITES_TOTAL.clone()))
        .expect("register WRITES_TOTAL");
    REGISTRY
        .register(Box::new(CGROUP_READ_FAILURES_TOTAL.clone()))
        .expect("register CGROUP_READ_FAILURES_TOTAL");
    REGISTRY
        .register(Box::new(ALLOCATION_MODE.clone()))
        .expect("register ALLOCATION_MODE");
}

/// Render the current snapshot in Prometheus text exposition format.
pub fn encode() -> String {
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    TextEncoder::new()
        .encode(&metric_families, &mut buf)
        .expect("encode prometheus metrics");
    String::from_utf8(buf).expect("prometheus output is valid utf8")
}
