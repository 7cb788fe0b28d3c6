// SPDX-License-Identifier: MIT
//! Demand sampler & tracker (spec §4.1): turns a raw per-tick cgroup
//! observation into a smoothed demand signal in `[0, 1]`.
//!
//! Pure logic only — no cgroup file I/O here, so it can run without a
//! filesystem in tests. The Agent's sampling loop owns the I/O and calls
//! into [`update`] once per pod per tick.

use tracing::warn;

use crate::types::{DemandSample, DemandState};

/// Tunables for the smoother and failure handling (spec §4.1).
#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    pub max_consecutive_failures: u32,
    pub alpha_rapid: f64,
    pub alpha_up: f64,
    pub alpha_down: f64,
    pub alpha_fast_decay: f64,
    pub rapid_threshold: f64,
    pub fast_decay_zero_count: u32,
    pub floor_epsilon: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            alpha_rapid: 0.8,
            alpha_up: 0.6,
            alpha_down: 0.2,
            alpha_fast_decay: 0.5,
            rapid_threshold: 0.3,
            fast_decay_zero_count: 5,
            floor_epsilon: 0.01,
        }
    }
}

/// Apply one tick's sample to `state` in place, returning the resulting
/// validity (true unless the sample was invalid) for the caller to log.
pub fn update(state: &mut DemandState, sample: &DemandSample, raw: f64, cfg: &SamplerConfig) -> bool {
    if !sample.sample_valid {
        state.consecutive_failure_count += 1;
        state.total_failures += 1;
        if state.consecutive_failure_count >= cfg.max_consecutive_failures {
            if state.smoothed_demand != 0.0 {
                warn!(
                    pod_id = %sample.pod_id,
                    consecutive_failures = state.consecutive_failure_count,
                    "forcing smoothed demand to 0 after repeated invalid cgroup samples"
                );
            }
            state.smoothed_demand = 0.0;
        }
        return false;
    }

    state.consecutive_failure_count = 0;
    state.last_observed_unix_ns = sample.timestamp_unix_ns;

    let s = state.smoothed_demand;
    let alpha = if raw > s {
        let r = (raw - s) / s.max(0.01);
        state.consecutive_zero_count = 0;
        if r > cfg.rapid_threshold {
            cfg.alpha_rapid
        } else {
            cfg.alpha_up
        }
    } else if raw == 0.0 {
        state.consecutive_zero_count += 1;
        if state.consecutive_zero_count >= cfg.fast_decay_zero_count {
            cfg.alpha_fast_decay
        } else {
            cfg.alpha_down
        }
    } else {
        state.consecutive_zero_count = 0;
        cfg.alpha_down
    };

    let mut next = alpha * raw + (1.0 - alpha) * s;
    next = next.clamp(0.0, 1.0);
    if next < cfg.floor_epsilon {
        next = 0.0;
    }
    state.smoothed_demand = next;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(valid: bool) -> DemandSample {
        DemandSample {
            pod_id: "pod-a".into(),
            timestamp_unix_ns: 1,
            throttled_time_ns: 0,
            runnable_time_ns: 0,
            cpu_usage_micros: 0,
            sample_valid: valid,
        }
    }

    #[test]
    fn converges_to_constant_raw_demand() {
        let cfg = SamplerConfig::default();
        let mut state = DemandState::default();
        for _ in 0..100 {
            update(&mut state, &sample(true), 0.7, &cfg);
        }
        assert!((state.smoothed_demand - 0.7).abs() < 1e-6);
    }

    #[test]
    fn sustained_zero_eventually_drives_to_zero() {
        let cfg = SamplerConfig::default();
        let mut state = DemandState {
            smoothed_demand: 0.9,
            ..Default::default()
        };
        for _ in 0..4 {
            update(&mut state, &sample(true), 0.0, &cfg);
        }
        // zero-count threshold (5) not yet reached: still using the slow alpha_down.
        assert!(state.smoothed_demand > cfg.floor_epsilon);
        for _ in 0..30 {
            update(&mut state, &sample(true), 0.0, &cfg);
        }
        assert_eq!(state.smoothed_demand, 0.0);
    }

    #[test]
    fn three_consecutive_invalid_samples_force_zero() {
        let cfg = SamplerConfig::default();
        let mut state = DemandState {
            smoothed_demand: 0.5,
            ..Default::default()
        };
        update(&mut state, &sample(false), 0.0, &cfg);
        assert_eq!(state.smoothed_demand, 0.5);
        update(&mut state, &sample(false), 0.0, &cfg);
        assert_eq!(state.smoothed_demand, 0.5);
        update(&mut state, &sample(false), 0.0, &cfg);
        assert_eq!(state.smoothed_demand, 0.0);
    }

    #[test]
    fn valid_sample_resets_failure_counter() {
        let cfg = SamplerConfig::default();
        let mut state = DemandState {
            smoothed_demand: 0.5,
            ..Default::default()
        };
        update(&mut state, &sample(false), 0.0, &cfg);
        update(&mut state, &sample(false), 0.0, &cfg);
        assert_eq!(state.consecutive_failure_count, 2);
        update(&mut state, &sample(true), 0.5, &cfg);
        assert_eq!(state.consecutive_failure_count, 0);
    }

    #[test]
    fn rapid_increase_uses_rapid_alpha() {
        let cfg = SamplerConfig::default();
        let mut state = DemandState {
            smoothed_demand: 0.1,
            ..Default::default()
        };
        update(&mut state, &sample(true), 1.0, &cfg);
        // alpha_rapid = 0.8: 0.8*1.0 + 0.2*0.1 = 0.82
        assert!((state.smoothed_demand - 0.82).abs() < 1e-9);
    }
}
