// SPDX-License-Identifier: MIT
//! Parameter extractor (spec §4.2): derives a [`PodParams`] from a pod's
//! declared CPU requests/limits plus its smoothed demand and usage.

use crate::types::PodParams;

/// Tunables (spec §4.2, §6 env vars).
#[derive(Debug, Clone, Copy)]
pub struct ExtractorConfig {
    pub baseline_milli: u64,
    pub node_capacity_milli: u64,
    pub per_pod_cap_fraction: f64,
    pub priority_multiplier_min: f64,
    pub priority_multiplier_max: f64,
}

impl ExtractorConfig {
    pub fn new(node_capacity_milli: u64) -> Self {
        Self {
            baseline_milli: 100,
            node_capacity_milli,
            per_pod_cap_fraction: 0.9,
            priority_multiplier_min: 0.1,
            priority_multiplier_max: 10.0,
        }
    }
}

/// A pod's declared resources and priority, read from the orchestrator's
/// pod object; kept separate from `k8s_openapi::Pod` so the pure extraction
/// math can be unit tested without constructing a full API object.
#[derive(Debug, Clone, Copy, Default)]
pub struct PodResourceFacts {
    pub request_milli: Option<u64>,
    pub limit_milli: Option<u64>,
    pub priority_value: Option<i32>,
    pub priority_multiplier_override: Option<f64>,
}

/// `weight = max(1.0, requestMilli) * priorityMultiplier` (spec §4.2).
pub fn priority_multiplier(cfg: &ExtractorConfig, facts: &PodResourceFacts) -> f64 {
    if let Some(over) = facts.priority_multiplier_override {
        return over.clamp(cfg.priority_multiplier_min, cfg.priority_multiplier_max);
    }
    let value = facts.priority_value.unwrap_or(0) as f64;
    (1.0 + value / 10000.0).clamp(cfg.priority_multiplier_min, cfg.priority_multiplier_max)
}

/// Build a [`PodParams`] for one pod, per spec §4.2's contract.
pub fn extract_params(
    cfg: &ExtractorConfig,
    facts: &PodResourceFacts,
    smoothed_demand: f64,
    usage_milli: u64,
) -> PodParams {
    let request_milli = facts.request_milli.unwrap_or(0);
    let weight = (request_milli as f64).max(1.0) * priority_multiplier(cfg, facts);

    let min_milli = cfg.baseline_milli.max(request_milli);

    let per_pod_cap = (cfg.per_pod_cap_fraction * cfg.node_capacity_milli as f64).floor() as u64;
    let mut max_milli = facts.limit_milli.unwrap_or(cfg.node_capacity_milli);
    max_milli = max_milli.min(per_pod_cap);
    if max_milli < min_milli {
        max_milli = min_milli;
    }

    PodParams {
        min_milli,
        max_milli,
        weight,
        demand: smoothed_demand.clamp(0.0, 1.0),
        actual_usage_milli: usage_milli,
        limit_milli: facts.limit_milli,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_floors_min_when_no_request() {
        let cfg = ExtractorConfig::new(4000);
        let facts = PodResourceFacts::default();
        let p = extract_params(&cfg, &facts, 0.5, 50);
        assert_eq!(p.min_milli, 100);
    }

    #[test]
    fn request_raises_min_above_baseline() {
        let cfg = ExtractorConfig::new(4000);
        let facts = PodResourceFacts {
            request_milli: Some(250),
            ..Default::default()
        };
        let p = extract_params(&cfg, &facts, 0.5, 50);
        assert_eq!(p.min_milli, 250);
    }

    #[test]
    fn max_capped_at_ninety_percent_of_capacity() {
        let cfg = ExtractorConfig::new(1000);
        let facts = PodResourceFacts {
            limit_milli: Some(5000),
            ..Default::default()
        };
        let p = extract_params(&cfg, &facts, 0.0, 0);
        assert_eq!(p.max_milli, 900);
    }

    #[test]
    fn max_defaults_to_capacity_when_unset() {
        let cfg = ExtractorConfig::new(1000);
        let facts = PodResourceFacts::default();
        let p = extract_params(&cfg, &facts, 0.0, 0);
        assert_eq!(p.max_milli, 900);
    }

    #[test]
    fn max_raised_to_min_if_below_it() {
        let cfg = ExtractorConfig::new(1000);
        let facts = PodResourceFacts {
            request_milli: Some(950),
            limit_milli: Some(950),
            ..Default::default()
        };
        let p = extract_params(&cfg, &facts, 0.0, 0);
        assert!(p.max_milli >= p.min_milli);
    }

    #[test]
    fn priority_override_takes_precedence_and_is_clamped() {
        let cfg = ExtractorConfig::new(1000);
        let facts = PodResourceFacts {
            priority_multiplier_override: Some(50.0),
            ..Default::default()
        };
        assert_eq!(priority_multiplier(&cfg, &facts), 10.0);
    }

    #[test]
    fn demand_is_clamped() {
        let cfg = ExtractorConfig::new(1000);
        let facts = PodResourceFacts::default();
        let p = extract_params(&cfg, &facts, 1.5, 0);
        assert_eq!(p.demand, 1.0);
        let p = extract_params(&cfg, &facts, -0.5, 0);
        assert_eq!(p.demand, 0.0);
    }
}
