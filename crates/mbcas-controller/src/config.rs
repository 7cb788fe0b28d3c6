// SPDX-License-Identifier: MIT
//! Controller configuration, loaded from environment variables with
//! defaults (spec §6), matching the Agent's `Config::load()` shape.

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
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ResizePolicy {
    RequestsAndLimits,
    LimitsOnly,
}

impl ResizePolicy {
    fn from_env(raw: &str) -> Self {
        match raw {
            "limits-only" => ResizePolicy::LimitsOnly,
            _ => ResizePolicy::RequestsAndLimits,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    pub cooldown: Duration,
    pub max_abs_delta_milli: u64,
    pub max_factor: f64,
    pub resize_policy: ResizePolicy,
    pub verify_timeout: Duration,
    pub api_timeout: Duration,
    pub health_port: u16,
}

impl ControllerConfig {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        Self {
            cooldown: env_duration_secs("COOLDOWN", 30),
            max_abs_delta_milli: env_u64("MAX_ABS_DELTA", 20_000),
            max_factor: env_f64("MAX_FACTOR", 10.0),
            resize_policy: ResizePolicy::from_env(&env_string(
                "RESIZE_POLICY",
                "requests-and-limits",
            )),
            verify_timeout: env_duration_secs("VERIFY_TIMEOUT", 15),
            api_timeout: env_duration_secs("API_TIMEOUT", 10),
            health_port: env_u32("HEALTH_PORT", 9091) as u16,
        }
    }
}
