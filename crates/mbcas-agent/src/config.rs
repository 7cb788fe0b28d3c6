// SPDX-License-Identifier: MIT
//! Agent configuration, loaded from environment variables with defaults
//! (spec §6), overridable by an optional `--config` TOML file.

use std::time::Duration;

use serde::Deserialize;

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim_end_matches('s').parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub sampling_interval: Duration,
    pub write_interval: Duration,
    pub min_change_percent: f64,
    pub system_reserve_percent: f64,
    pub baseline_cpu_milli: u64,
    pub startup_grace_period: Duration,
    pub need_headroom_factor: f64,
    pub want_headroom_factor: f64,
    pub max_demand_multiplier: f64,
    pub coalition_grouping_annotation: String,
    pub cgroup_root: String,
    pub stale_ttl: Duration,
    pub max_consecutive_failures: u32,
    pub health_port: u16,
    pub node_name: String,
    pub node_capacity_milli: u64,
}

impl AgentConfig {
    /// Load from environment variables, matching each of the teacher's
    /// `Config::load()` patterns (`env::var(...).ok().and_then(...).unwrap_or(default)`).
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        Self {
            sampling_interval: env_duration_secs("SAMPLING_INTERVAL", 1),
            write_interval: env_duration_secs("WRITE_INTERVAL", 5),
            min_change_percent: env_f64("MIN_CHANGE_PERCENT", 2.0),
            system_reserve_percent: env_f64("SYSTEM_RESERVE_PERCENT", 10.0),
            baseline_cpu_milli: env_u64("BASELINE_CPU_PER_POD", 100),
            startup_grace_period: env_duration_secs("STARTUP_GRACE_PERIOD", 60),
            need_headroom_factor: env_f64("NEED_HEADROOM_FACTOR", 0.15),
            want_headroom_factor: env_f64("WANT_HEADROOM_FACTOR", 0.10),
            max_demand_multiplier: env_f64("MAX_DEMAND_MULTIPLIER", 4.0),
            coalition_grouping_annotation: env_string(
                "COALITION_GROUPING_ANNOTATION",
                "mbcas.io/coalition",
            ),
            cgroup_root: env_string("CGROUP_ROOT", "/sys/fs/cgroup"),
            stale_ttl: env_duration_secs("STALE_TTL", 300),
            max_consecutive_failures: env_u32("MAX_CONSECUTIVE_FAILURES", 3),
            health_port: env_u32("HEALTH_PORT", 9090) as u16,
            node_name: env_string("NODE_NAME", "unknown-node"),
            node_capacity_milli: env_u64("NODE_CAPACITY_MILLICORES", 4000),
        }
    }
}
