// SPDX-License-Identifier: MIT
//! Shared data contracts: the sole boundary types between the sampler, the
//! allocator, the Agent, and the Controller.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Stable pod identity used as the allocator's sort/tie-break key (INV-3).
pub type PodId = String;

/// Raw per-pod observation for a single sampling tick.
#[derive(Debug, Clone, PartialEq)]
pub struct DemandSample {
    pub pod_id: PodId,
    pub timestamp_unix_ns: u64,
    pub throttled_time_ns: u64,
    pub runnable_time_ns: u64,
    pub cpu_usage_micros: u64,
    pub sample_valid: bool,
}

impl DemandSample {
    /// `clamp( (throttled_now - throttled_prev) / (runnable_now - runnable_prev), 0, 1)`.
    /// Returns 0.0 (not an error) for an invalid sample; callers consult
    /// `sample_valid` separately.
    pub fn raw_demand(&self, prev: Option<&DemandSample>) -> f64 {
        if !self.sample_valid {
            return 0.0;
        }
        let Some(prev) = prev else { return 0.0 };
        let d_throttled = self.throttled_time_ns.saturating_sub(prev.throttled_time_ns) as f64;
        let d_runnable = self.runnable_time_ns.saturating_sub(prev.runnable_time_ns) as f64;
        if d_runnable <= 0.0 {
            return 0.0;
        }
        (d_throttled / d_runnable).clamp(0.0, 1.0)
    }
}

/// Per-pod smoothed demand state, owned by the Agent's tracker map.
#[derive(Debug, Clone, PartialEq)]
pub struct DemandState {
    pub smoothed_demand: f64,
    pub consecutive_zero_count: u32,
    pub consecutive_failure_count: u32,
    pub total_failures: u64,
    pub last_observed_unix_ns: u64,
}

impl Default for DemandState {
    fn default() -> Self {
        Self {
            smoothed_demand: 0.0,
            consecutive_zero_count: 0,
            consecutive_failure_count: 0,
            total_failures: 0,
            last_observed_unix_ns: 0,
        }
    }
}

/// Derived per-cycle allocator input for one pod.
#[derive(Debug, Clone, PartialEq)]
pub struct PodParams {
    pub min_milli: u64,
    pub max_milli: u64,
    pub weight: f64,
    pub demand: f64,
    pub actual_usage_milli: u64,
    pub limit_milli: Option<u64>,
}

/// The three disjoint allocation regimes (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Uncongested,
    Congested,
    Overloaded,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Uncongested => write!(f, "uncongested"),
            Mode::Congested => write!(f, "congested"),
            Mode::Overloaded => write!(f, "overloaded"),
        }
    }
}

/// Per-pod allocator output: the limit allocation plus its request
/// counterpart (INV-4: `request_milli <= limit_milli`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PodAllocation {
    pub limit_milli: u64,
    pub request_milli: u64,
}

/// The allocator's complete, deterministic output for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationResult {
    pub allocations: BTreeMap<PodId, PodAllocation>,
    pub mode: Mode,
    pub capacity_milli: u64,
    pub total_allocated_milli: u64,
}

/// Observed-state phase of an `AllocationRecord` (state machine in spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum Phase {
    #[default]
    Pending,
    Applied,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pending => write!(f, "Pending"),
            Phase::Applied => write!(f, "Applied"),
            Phase::Failed => write!(f, "Failed"),
        }
    }
}

/// Typed failure taxonomy (spec §4.4, §7). Formatted into
/// `AllocationRecordStatus.reason`; never hand-formatted by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Reason {
    #[error("PodNotFound")]
    PodNotFound,
    #[error("Excluded")]
    Excluded,
    #[error("GuaranteedQoS")]
    GuaranteedQoS,
    #[error("Cooldown")]
    Cooldown,
    #[error("InvalidDesired")]
    InvalidDesired,
    #[error("StepSizeExceeded")]
    StepSizeExceeded,
    #[error("ActuatorError")]
    ActuatorError,
    #[error("ResizeNotVerified")]
    ResizeNotVerified,
    #[error("Forbidden")]
    Forbidden,
    #[error("FeatureGateMissing")]
    FeatureGateMissing,
    #[error("Applied")]
    Applied,
}

/// The sole namespaced object carrying `(podRef, desiredRequest,
/// desiredLimit, status)` — the boundary between Agent and Controller.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "mbcas.io",
    version = "v1alpha1",
    kind = "AllocationRecord",
    namespaced,
    status = "AllocationRecordStatus",
    shortname = "mbcasalloc"
)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRecordSpec {
    pub namespace: String,
    pub pod_name: String,
    pub desired_cpu_request: String,
    pub desired_cpu_limit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRecordStatus {
    pub applied_cpu_request: Option<String>,
    pub applied_cpu_limit: Option<String>,
    pub phase: Phase,
    pub reason: String,
    pub last_applied_time: Option<Time>,
    pub last_attempt_time: Option<Time>,
    /// 0 == uncongested; optional experimental shadow price, spec §9.
    pub shadow_price_cpu: Option<f64>,
}
