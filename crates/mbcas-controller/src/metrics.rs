// SPDX-License-Identifier: MIT
//! Prometheus metrics for the Controller (spec §6, §7 "metrics expose
//! counts of each failure class"), same `lazy_static` + real `prometheus`
//! registry shape as the Agent's `metrics.rs`.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static::lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref RECONCILES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("mbcas_controller_reconciles_total", "Reconcile outcomes by phase"),
        &["phase"],
    ).unwrap();

    pub static ref SAFETY_GATE_BLOCKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("mbcas_controller_safety_gate_blocks_total", "Safety-gate rejections by reason"),
        &["reason"],
    ).unwrap();

    pub static ref RESIZES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("mbcas_controller_resizes_total", "Resize attempts by outcome"),
        &["outcome"],
    ).unwrap();
}

pub fn register_all() {
    REGISTRY.register(Box::new(RECONCILES_TOTAL.clone())).expect("register RECONCILES_TOTAL");
    REGISTRY
        .register(Box::new(SAFETY_GATE_BLOCKS_TOTAL.clone()))
        .expect("register SAFETY_GATE_BLOCKS_TOTAL");
    REGISTRY.register(Box::new(RESIZES_TOTAL.clone())).expect("register RESIZES_TOTAL");
}

pub fn encode() -> String {
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buf).expect("encode prometheus metrics");
    String::from_utf8(buf).expect("prometheus output is valid utf8")
}
