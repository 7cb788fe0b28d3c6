// SPDX-License-Identifier: MIT
//! Safety gates (spec §4.4 step 4), kept as free functions over plain
//! millicore values so they're unit-testable without a live cluster — the
//! same "pure function, constructed inputs" shape as `mbcas_core::allocator`.

use std::time::Duration;

use mbcas_core::Reason;

const MIN_SAFE_BASELINE_MILLI: u64 = 100;

#[derive(Debug, Clone, Copy)]
pub struct SafetyConfig {
    pub cooldown: Duration,
    pub max_abs_delta_milli: u64,
    pub max_factor: f64,
}

/// Runs every safety check in spec order, short-circuiting on the first
/// failure. `Ok(())` means the Controller may proceed to apply.
pub fn check(
    cfg: &SafetyConfig,
    time_since_last_applied: Option<Duration>,
    desired_milli: u64,
    current_milli: u64,
) -> Result<(), Reason> {
    if let Some(since) = time_since_last_applied {
        if since < cfg.cooldown {
            return Err(Reason::Cooldown);
        }
    }

    if desired_milli == 0 {
        return Err(Reason::InvalidDesired);
    }

    let abs_delta = desired_milli.abs_diff(current_milli);
    if abs_delta > cfg.max_abs_delta_milli {
        return Err(Reason::InvalidDesired);
    }

    let effective_current = current_milli.max(MIN_SAFE_BASELINE_MILLI);
    let (hi, lo) = if desired_milli > effective_current {
        (desired_milli, effective_current)
    } else {
        (effective_current, desired_milli)
    };
    let factor = hi as f64 / lo.max(1) as f64;
    if factor > cfg.max_factor {
        return Err(Reason::StepSizeExceeded);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SafetyConfig {
        SafetyConfig {
            cooldown: Duration::from_secs(30),
            max_abs_delta_milli: 20_000,
            max_factor: 10.0,
        }
    }

    #[test]
    fn e6_within_factor_passes() {
        // desired=500m, current=100m: factor = 5x, below default 10x.
        assert!(check(&cfg(), None, 500, 100).is_ok());
    }

    #[test]
    fn e6_over_factor_rejected() {
        // desired=2000m, current=100m: factor = 20x, over default 10x.
        assert_eq!(check(&cfg(), None, 2000, 100), Err(Reason::StepSizeExceeded));
    }

    #[test]
    fn cooldown_pends_recent_apply() {
        let result = check(&cfg(), Some(Duration::from_secs(5)), 500, 100);
        assert_eq!(result, Err(Reason::Cooldown));
    }

    #[test]
    fn cooldown_elapsed_passes() {
        let result = check(&cfg(), Some(Duration::from_secs(60)), 500, 100);
        assert!(result.is_ok());
    }

    #[test]
    fn zero_desired_rejected() {
        assert_eq!(check(&cfg(), None, 0, 100), Err(Reason::InvalidDesired));
    }

    #[test]
    fn absolute_delta_cap_rejected() {
        assert_eq!(check(&cfg(), None, 25_000, 100), Err(Reason::InvalidDesired));
    }

    #[test]
    fn step_size_uses_min_safe_baseline_when_current_is_near_zero() {
        // current=1m would otherwise make the factor enormous; baseline clamps it.
        let result = check(&cfg(), None, 500, 1);
        assert!(result.is_ok());
    }
}
