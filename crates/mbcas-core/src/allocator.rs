// SPDX-License-Identifier: MIT
//! Market-clearing allocator (spec §4.3): a pure function from node capacity
//! and per-pod parameters to a deterministic [`AllocationResult`].
//!
//! Never fails. Empty input yields empty output. All tie-breaks use the
//! pod's `BTreeMap` position, which is lexicographic ordering on `PodId`
//! (INV-3: determinism).

use std::collections::BTreeMap;

use crate::types::{AllocationResult, Mode, PodAllocation, PodId, PodParams};

/// Tunables for need/want headroom and request-allocation ratios (spec §4.3).
#[derive(Debug, Clone, Copy)]
pub struct AllocatorConfig {
    pub need_headroom: f64,
    pub want_headroom: f64,
    pub max_demand_multiplier: f64,
    pub request_ratio_congested: f64,
    pub request_ratio_uncongested: f64,
    pub min_request_floor_milli: u64,
    pub abs_floor_milli: u64,
    pub max_ks_iterations: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            need_headroom: 0.15,
            want_headroom: 0.10,
            max_demand_multiplier: 4.0,
            request_ratio_congested: 0.95,
            request_ratio_uncongested: 0.75,
            min_request_floor_milli: 10,
            abs_floor_milli: 10,
            max_ks_iterations: 100,
        }
    }
}

fn need_of(p: &PodParams, cfg: &AllocatorConfig) -> u64 {
    if p.actual_usage_milli == 0 {
        return p.min_milli;
    }
    let raw = p.actual_usage_milli as f64 * (1.0 + cfg.need_headroom);
    (raw.round() as u64).clamp(p.min_milli, p.max_milli)
}

fn want_of(p: &PodParams, cfg: &AllocatorConfig) -> u64 {
    let raw = p.actual_usage_milli as f64
        * (1.0 + cfg.want_headroom + cfg.max_demand_multiplier * p.demand);
    (raw.round() as u64).clamp(p.min_milli, p.max_milli)
}

/// Distribute `deficit` single-millicore units to pods with headroom
/// (`alloc_i < cap_i`), in ascending `PodId` order, until `deficit` is
/// exhausted or no pod has headroom left (spec §4.3 step 4).
fn distribute_deficit(
    alloc: &mut BTreeMap<PodId, u64>,
    caps: &BTreeMap<PodId, u64>,
    mut deficit: u64,
) {
    if deficit == 0 {
        return;
    }
    // Bounded passes: one full pass can only ever hand out len(alloc) units,
    // so this always terminates without relying on `deficit` shrinking to 0
    // mid-pass under pathological caps.
    for _ in 0..alloc.len() + 1 {
        if deficit == 0 {
            break;
        }
        let mut progressed = false;
        for (pod_id, a) in alloc.iter_mut() {
            if deficit == 0 {
                break;
            }
            let cap = caps.get(pod_id).copied().unwrap_or(*a);
            if *a < cap {
                *a += 1;
                deficit -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
}

fn equal_division(capacity: u64, pod_ids: &[PodId]) -> BTreeMap<PodId, u64> {
    let n = pod_ids.len() as u64;
    let mut out = BTreeMap::new();
    if n == 0 {
        return out;
    }
    let base = capacity / n;
    let mut remainder = capacity % n;
    for pod_id in pod_ids {
        let mut share = base;
        if remainder > 0 {
            share += 1;
            remainder -= 1;
        }
        out.insert(pod_id.clone(), share);
    }
    out
}

fn allocate_overloaded(
    capacity_milli: u64,
    pods: &BTreeMap<PodId, PodParams>,
    cfg: &AllocatorConfig,
) -> BTreeMap<PodId, u64> {
    let pod_ids: Vec<PodId> = pods.keys().cloned().collect();
    let total_weighted_min: f64 = pods.values().map(|p| p.min_milli as f64 * p.weight).sum();

    let mut exact: BTreeMap<PodId, f64> = BTreeMap::new();
    if total_weighted_min <= 0.0 {
        // Degenerate: all baselines (effectively) zero, fall back to equal
        // division (spec §4.3 "Failure semantics").
        let shares = equal_division(capacity_milli, &pod_ids);
        return shares;
    }
    for (id, p) in pods {
        let share = p.min_milli as f64 * p.weight * capacity_milli as f64 / total_weighted_min;
        exact.insert(id.clone(), share);
    }

    let mut alloc: BTreeMap<PodId, u64> = exact.iter().map(|(k, v)| (k.clone(), v.floor() as u64)).collect();

    let capacity_permits_floor =
        capacity_milli >= cfg.abs_floor_milli.saturating_mul(pod_ids.len() as u64);
    if capacity_permits_floor {
        for a in alloc.values_mut() {
            if *a < cfg.abs_floor_milli {
                *a = cfg.abs_floor_milli;
            }
        }
    }

    let sum_alloc: u64 = alloc.values().sum();
    if sum_alloc > capacity_milli {
        // The absolute floor bump pushed the total over capacity; trim back
        // down from pods with the most headroom above the floor, largest
        // first, lexicographic podId as the final tie-break.
        let mut surplus = sum_alloc - capacity_milli;
        let mut order: Vec<PodId> = pod_ids.clone();
        order.sort_by(|a, b| alloc[b].cmp(&alloc[a]).then_with(|| a.cmp(b)));
        while surplus > 0 {
            let mut progressed = false;
            for id in &order {
                if surplus == 0 {
                    break;
                }
                let a = alloc.get_mut(id).unwrap();
                if *a > cfg.abs_floor_milli {
                    *a -= 1;
                    surplus -= 1;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    } else if sum_alloc < capacity_milli {
        let caps: BTreeMap<PodId, u64> = pod_ids
            .iter()
            .map(|id| (id.clone(), capacity_milli))
            .collect();
        distribute_deficit(&mut alloc, &caps, capacity_milli - sum_alloc);
    }

    alloc
}

/// Weighted Kalai-Smorodinsky bargaining via iterative water-filling
/// (spec §4.3's `alloc_i = min_i + λ·weight_i·gain_i` closed form, solved
/// round by round instead of as a single λ):
///
/// `gain_i = ideal_i - min_i` is fixed up front from each pod's own `want_i`
/// and used, unchanged, as the proportionality weight `weight_i * gain_i`
/// for every round — this is what makes equal-weight pods split an equal
/// *fraction of their own gain* regardless of how large that gain is (spec
/// Property 5), rather than an equal number of absolute units.
///
/// A pod is pinned once its cumulative share would carry it past its
/// structural ceiling, `headroom_i = max_i - min_i` — not past `gain_i`
/// itself, since `gain_i` (derived from `want_i`) can sit well below
/// `headroom_i` for a pod with plenty of slack, and such a pod may still
/// legitimately receive more than its own "ideal" once capacity is left
/// over from pods that *did* saturate. Pinned pods drop out of the active
/// set and their surplus flows back into the pool; the remaining active
/// pods are re-split from scratch each round over their original fixed
/// weight, so a round's provisional shares are discarded, not accumulated,
/// until a round produces no new pin (the stable point).
fn allocate_congested(
    capacity_milli: u64,
    pods: &BTreeMap<PodId, PodParams>,
    cfg: &AllocatorConfig,
) -> BTreeMap<PodId, u64> {
    let pod_ids: Vec<PodId> = pods.keys().cloned().collect();
    let sum_min: u64 = pods.values().map(|p| p.min_milli).sum();
    let mut remaining = (capacity_milli - sum_min) as f64;

    let mut extra: BTreeMap<PodId, f64> = pod_ids.iter().map(|id| (id.clone(), 0.0)).collect();
    let mut gain: BTreeMap<PodId, f64> = BTreeMap::new();
    let mut headroom: BTreeMap<PodId, f64> = BTreeMap::new();
    let mut active: Vec<PodId> = Vec::new();
    for (id, p) in pods {
        let ideal = want_of(p, cfg).clamp(p.min_milli, p.max_milli) as f64;
        let g = (ideal - p.min_milli as f64).max(0.0);
        gain.insert(id.clone(), g);
        headroom.insert(id.clone(), (p.max_milli - p.min_milli) as f64);
        if g > 0.0 {
            active.push(id.clone());
        }
    }

    for _ in 0..cfg.max_ks_iterations {
        if active.is_empty() || remaining <= 0.0 {
            break;
        }
        let weighted_sum: f64 = active.iter().map(|id| pods[id].weight * gain[id]).sum();
        if weighted_sum <= 0.0 {
            break;
        }
        let mut newly_capped = Vec::new();
        let mut capped_amount = 0.0;
        for id in &active {
            let p = &pods[id];
            let room = headroom[id] - extra[id];
            let tentative = remaining * (p.weight * gain[id]) / weighted_sum;
            if tentative >= room {
                extra.insert(id.clone(), extra[id] + room);
                capped_amount += room;
                newly_capped.push(id.clone());
            }
        }
        if newly_capped.is_empty() {
            for id in &active {
                let p = &pods[id];
                let tentative = remaining * (p.weight * gain[id]) / weighted_sum;
                extra.insert(id.clone(), extra[id] + tentative);
            }
            remaining = 0.0;
            break;
        }
        remaining -= capped_amount;
        active.retain(|id| !newly_capped.contains(id));
    }

    let mut exact: BTreeMap<PodId, f64> = BTreeMap::new();
    for (id, p) in pods {
        exact.insert(id.clone(), p.min_milli as f64 + extra[id]);
    }

    let mut alloc: BTreeMap<PodId, u64> = exact.iter().map(|(k, v)| (k.clone(), v.floor() as u64)).collect();
    let caps: BTreeMap<PodId, u64> = pods.iter().map(|(k, p)| (k.clone(), p.max_milli)).collect();
    let sum_alloc: u64 = alloc.values().sum();
    if sum_alloc < capacity_milli {
        distribute_deficit(&mut alloc, &caps, capacity_milli - sum_alloc);
    }

    alloc
}

/// Run the allocator for one cycle. Pure, deterministic, total.
pub fn allocate(
    capacity_milli: u64,
    pods: &BTreeMap<PodId, PodParams>,
    cfg: &AllocatorConfig,
) -> AllocationResult {
    if pods.is_empty() {
        return AllocationResult {
            allocations: BTreeMap::new(),
            mode: Mode::Uncongested,
            capacity_milli,
            total_allocated_milli: 0,
        };
    }

    let sum_min: u64 = pods.values().map(|p| p.min_milli).sum();
    let mode = if sum_min > capacity_milli {
        Mode::Overloaded
    } else {
        let sum_want: u64 = pods.values().map(|p| want_of(p, cfg)).sum();
        if sum_want > capacity_milli {
            Mode::Congested
        } else {
            Mode::Uncongested
        }
    };

    let limit_alloc: BTreeMap<PodId, u64> = match mode {
        Mode::Overloaded => allocate_overloaded(capacity_milli, pods, cfg),
        Mode::Congested => allocate_congested(capacity_milli, pods, cfg),
        Mode::Uncongested => pods.iter().map(|(id, p)| (id.clone(), need_of(p, cfg))).collect(),
    };

    let request_ratio = match mode {
        Mode::Uncongested => cfg.request_ratio_uncongested,
        Mode::Congested | Mode::Overloaded => cfg.request_ratio_congested,
    };

    let mut allocations = BTreeMap::new();
    let mut total = 0u64;
    for (id, p) in pods {
        let limit = limit_alloc.get(id).copied().unwrap_or(0);
        let usage_floor = (p.actual_usage_milli as f64 * 1.05).round() as u64;
        let ratio_floor = (limit as f64 * request_ratio).round() as u64;
        let inner = cfg.min_request_floor_milli.max(usage_floor).max(ratio_floor);
        let request = inner.min(limit);
        allocations.insert(
            id.clone(),
            PodAllocation {
                limit_milli: limit,
                request_milli: request,
            },
        );
        total += limit;
    }

    AllocationResult {
        allocations,
        mode,
        capacity_milli,
        total_allocated_milli: total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(min: u64, max: u64, weight: f64, demand: f64, usage: u64) -> PodParams {
        PodParams {
            min_milli: min,
            max_milli: max,
            weight,
            demand,
            actual_usage_milli: usage,
            limit_milli: Some(max),
        }
    }

    #[test]
    fn e1_uncongested() {
        let cfg = AllocatorConfig::default();
        let mut pods = BTreeMap::new();
        pods.insert("a".to_string(), pod(100, 1000, 100.0, 0.5, 200));
        pods.insert("b".to_string(), pod(100, 1000, 100.0, 0.5, 100));
        let result = allocate(1000, &pods, &cfg);
        assert_eq!(result.mode, Mode::Uncongested);
        assert_eq!(result.allocations["a"].limit_milli, 230);
        assert_eq!(result.allocations["b"].limit_milli, 115);
        assert!(result.total_allocated_milli <= 1000);
    }

    #[test]
    fn e2_congested_equal_weights() {
        let cfg = AllocatorConfig::default();
        let mut pods = BTreeMap::new();
        pods.insert("a".to_string(), pod(100, 1000, 100.0, 1.0, 500));
        pods.insert("b".to_string(), pod(100, 1000, 100.0, 1.0, 500));
        let result = allocate(1000, &pods, &cfg);
        assert_eq!(result.mode, Mode::Congested);
        let a = result.allocations["a"].limit_milli as i64;
        let b = result.allocations["b"].limit_milli as i64;
        assert!((a - 500).abs() <= 1);
        assert!((b - 500).abs() <= 1);
        assert_eq!(a as u64 + b as u64, 1000);
    }

    #[test]
    fn e3_congested_unequal_weights() {
        let cfg = AllocatorConfig::default();
        let mut pods = BTreeMap::new();
        pods.insert("a".to_string(), pod(100, 1000, 200.0, 1.0, 500));
        pods.insert("b".to_string(), pod(100, 1000, 100.0, 1.0, 500));
        let result = allocate(1000, &pods, &cfg);
        assert_eq!(result.mode, Mode::Congested);
        let a = result.allocations["a"].limit_milli;
        let b = result.allocations["b"].limit_milli;
        assert_eq!(a + b, 1000);
        let gain_ratio = (a as f64 - 100.0) / (b as f64 - 100.0);
        assert!((gain_ratio - 2.0).abs() < 0.1);
    }

    #[test]
    fn equal_weight_equal_gain_pods_split_gain_fraction_evenly() {
        // Property 5 (spec §8): for equal-weight pods, uncapped allocations
        // split the same fraction of their own gain.
        let cfg = AllocatorConfig::default();
        let mut pods = BTreeMap::new();
        pods.insert("a".to_string(), pod(100, 1000, 100.0, 0.8, 300));
        pods.insert("b".to_string(), pod(100, 1000, 100.0, 0.8, 300));
        pods.insert("c".to_string(), pod(100, 1000, 100.0, 0.8, 300));
        let result = allocate(900, &pods, &cfg);
        assert_eq!(result.mode, Mode::Congested);
        let a = result.allocations["a"].limit_milli as i64;
        let b = result.allocations["b"].limit_milli as i64;
        let c = result.allocations["c"].limit_milli as i64;
        assert!((a - b).abs() <= 1);
        assert!((b - c).abs() <= 1);
    }

    #[test]
    fn e4_overloaded() {
        let cfg = AllocatorConfig::default();
        let mut pods = BTreeMap::new();
        pods.insert("a".to_string(), pod(600, 1000, 100.0, 1.0, 600));
        pods.insert("b".to_string(), pod(600, 1000, 100.0, 1.0, 600));
        let result = allocate(1000, &pods, &cfg);
        assert_eq!(result.mode, Mode::Overloaded);
        let a = result.allocations["a"].limit_milli;
        let b = result.allocations["b"].limit_milli;
        assert_eq!(a + b, 1000);
        assert!((a as i64 - 500).abs() <= 1);
        assert!(a >= 10 && b >= 10);
    }

    #[test]
    fn e5_cap_and_redistribute() {
        let cfg = AllocatorConfig::default();
        let mut pods = BTreeMap::new();
        pods.insert("a".to_string(), pod(100, 300, 100.0, 1.0, 300));
        pods.insert("b".to_string(), pod(100, 1000, 100.0, 0.5, 100));
        pods.insert("c".to_string(), pod(100, 1000, 100.0, 0.5, 100));
        let result = allocate(1000, &pods, &cfg);
        assert_eq!(result.allocations["a"].limit_milli, 300);
        let b = result.allocations["b"].limit_milli;
        let c = result.allocations["c"].limit_milli;
        assert_eq!(300 + b + c, 1000);
        assert!((b as i64 - c as i64).abs() <= 1);
        assert_eq!(b, 350);
        assert_eq!(c, 350);
    }

    #[test]
    fn unequal_gain_equal_weight_pods_split_equal_gain_fraction_not_equal_units() {
        // Regression for a water-filling bug that weighted the fill step by
        // `weight_i` alone: with equal weights and unequal gains, it handed
        // out equal absolute units (an unequal fraction of each pod's own
        // gain) instead of an equal fraction of gain. Neither pod is capped
        // here, so this isolates the fill-step weighting from any
        // redistribution logic.
        let cfg = AllocatorConfig::default();
        let mut pods = BTreeMap::new();
        pods.insert("a".to_string(), pod(100, 1000, 100.0, 1.0, 100));
        pods.insert("b".to_string(), pod(100, 1000, 100.0, 1.0, 900));
        let result = allocate(900, &pods, &cfg);
        assert_eq!(result.mode, Mode::Congested);
        let a = result.allocations["a"].limit_milli as f64;
        let b = result.allocations["b"].limit_milli as f64;
        assert!(a < 300.0, "pod a should not be capped: {a}");
        assert!(b < 1000.0, "pod b should not be capped: {b}");
        let gain_a = 410.0; // ideal_a = clamp(100*(1+0.1+4), 100, 1000) = 510
        let gain_b = 900.0; // ideal_b = clamp(900*(1+0.1+4), 100, 1000) = 1000
        let fraction_a = (a - 100.0) / gain_a;
        let fraction_b = (b - 100.0) / gain_b;
        assert!(
            (fraction_a - fraction_b).abs() < 0.01,
            "equal-weight pods must split an equal fraction of their own gain: {fraction_a} vs {fraction_b}"
        );
        assert!((fraction_a - 0.534).abs() < 0.01, "fraction_a = {fraction_a}");
    }

    #[test]
    fn inv4_request_never_exceeds_limit() {
        let cfg = AllocatorConfig::default();
        let mut pods = BTreeMap::new();
        pods.insert("a".to_string(), pod(100, 1000, 100.0, 1.0, 50));
        let result = allocate(1000, &pods, &cfg);
        let alloc = &result.allocations["a"];
        assert!(alloc.request_milli <= alloc.limit_milli);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let cfg = AllocatorConfig::default();
        let pods = BTreeMap::new();
        let result = allocate(1000, &pods, &cfg);
        assert!(result.allocations.is_empty());
        assert_eq!(result.total_allocated_milli, 0);
    }

    #[test]
    fn determinism_same_input_same_output() {
        let cfg = AllocatorConfig::default();
        let mut pods = BTreeMap::new();
        pods.insert("a".to_string(), pod(100, 1000, 150.0, 0.8, 400));
        pods.insert("b".to_string(), pod(100, 1000, 90.0, 0.3, 100));
        pods.insert("c".to_string(), pod(200, 800, 120.0, 1.0, 700));
        let r1 = allocate(1000, &pods, &cfg);
        let r2 = allocate(1000, &pods, &cfg);
        assert_eq!(r1, r2);
    }

    proptest::proptest! {
        #[test]
        fn prop_never_exceeds_capacity(
            capacity in 100u64..5000,
            mins in proptest::collection::vec(0u64..500, 1..6),
            weights in proptest::collection::vec(1.0f64..50.0, 1..6),
            demands in proptest::collection::vec(0.0f64..1.0, 1..6),
            usages in proptest::collection::vec(0u64..2000, 1..6),
        ) {
            let n = mins.len().min(weights.len()).min(demands.len()).min(usages.len());
            let cfg = AllocatorConfig::default();
            let mut pods = BTreeMap::new();
            for i in 0..n {
                let min_milli = mins[i].min(capacity);
                let max_milli = (min_milli + 500).min(capacity.max(min_milli));
                pods.insert(
                    format!("pod-{i}"),
                    PodParams {
                        min_milli,
                        max_milli: max_milli.max(min_milli),
                        weight: weights[i],
                        demand: demands[i],
                        actual_usage_milli: usages[i],
                        limit_milli: Some(max_milli.max(min_milli)),
                    },
                );
            }
            let result = allocate(capacity, &pods, &cfg);
            prop_assert!(result.total_allocated_milli <= capacity);
        }

        #[test]
        fn prop_bounds_respected_non_overloaded(
            capacity in 1000u64..5000,
            usages in proptest::collection::vec(0u64..300, 2..5),
            demands in proptest::collection::vec(0.0f64..1.0, 2..5),
        ) {
            let n = usages.len().min(demands.len());
            let cfg = AllocatorConfig::default();
            let mut pods = BTreeMap::new();
            for i in 0..n {
                pods.insert(
                    format!("pod-{i}"),
                    PodParams {
                        min_milli: 100,
                        max_milli: 1000,
                        weight: 100.0,
                        demand: demands[i],
                        actual_usage_milli: usages[i],
                        limit_milli: Some(1000),
                    },
                );
            }
            let result = allocate(capacity, &pods, &cfg);
            if result.mode != Mode::Overloaded {
                for (id, p) in &pods {
                    let alloc = result.allocations[id].limit_milli;
                    prop_assert!(alloc >= p.min_milli && alloc <= p.max_milli);
                }
            }
        }

        #[test]
        fn prop_determinism(
            capacity in 500u64..3000,
            usages in proptest::collection::vec(0u64..400, 1..5),
        ) {
            let cfg = AllocatorConfig::default();
            let mut pods = BTreeMap::new();
            for (i, u) in usages.iter().enumerate() {
                pods.insert(
                    format!("pod-{i}"),
                    PodParams {
                        min_milli: 100,
                        max_milli: 900,
                        weight: 100.0,
                        demand: 0.5,
                        actual_usage_milli: *u,
                        limit_milli: Some(900),
                    },
                );
            }
            let r1 = allocate(capacity, &pods, &cfg);
            let r2 = allocate(capacity, &pods, &cfg);
            prop_assert_eq!(r1, r2);
        }
    }
}
