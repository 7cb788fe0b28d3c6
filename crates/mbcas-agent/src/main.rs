// SPDX-License-Identifier: MIT
//! MBCAS Node Agent entry point: wires configuration, the sampling loop, the
//! write loop, and the health server as three cooperating Tokio tasks,
//! joined on a shutdown signal (spec §5).

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mbcas_agent::config::AgentConfig;
use mbcas_agent::status::AgentStatus;
use mbcas_agent::tracker::DemandTracker;
use mbcas_agent::{cgroup, health, pods, sampling, writer};

/// MBCAS Node Agent: per-node CPU-pressure sampling and allocation publisher.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Optional TOML file overriding environment-derived configuration.
    #[arg(long)]
    config: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut cfg = AgentConfig::load();
    if let Some(path) = &cli.config {
        let raw = std::fs::read_to_string(path)?;
        cfg = toml::from_str(&raw).unwrap_or(cfg);
    }

    info!(node = %cfg.node_name, "starting mbcas-agentd");

    cgroup::validate_cgroups_discoverable(&cfg.cgroup_root)?;

    let client = Client::try_default().await?;
    let tracker = Arc::new(DemandTracker::new());
    let status = Arc::new(AgentStatus::new(true));
    let pod_cache = pods::PodCache::spawn(client.clone(), cfg.node_name.clone());
    let usage_milli = Arc::new(dashmap::DashMap::new());

    let sampling_loop = sampling::SamplingLoop::new(
        cfg.clone(),
        tracker.clone(),
        pod_cache.clone(),
        usage_milli.clone(),
        status.clone(),
    );
    let write_loop = writer::WriteLoop::new(
        cfg.clone(),
        client,
        tracker.clone(),
        pod_cache,
        usage_milli,
        status.clone(),
    );

    let sampling_task = tokio::spawn(sampling_loop.run());
    let write_task = tokio::spawn(write_loop.run());
    let health_task = tokio::spawn(health::run(cfg.clone(), tracker.clone(), status));

    tokio::select! {
        res = sampling_task => {
            if let Err(err) = res {
                error!(error = %err, "sampling task terminated unexpectedly");
            }
        }
        res = write_task => {
            if let Err(err) = res {
                error!(error = %err, "write task terminated unexpectedly");
            }
        }
        res = health_task => {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(error = %err, "health server terminated"),
                Err(err) => error!(error = %err, "health task terminated unexpectedly"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal, exiting");
        }
    }

    Ok(())
}
