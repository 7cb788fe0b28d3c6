// SPDX-License-Identifier: MIT
//! MBCAS Actuation Controller entry point: verifies the resize subresource
//! is available, then runs the reconciler and health server as cooperating
//! Tokio tasks.

use clap::Parser;
use kube::Client;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mbcas_controller::actuator::Actuator;
use mbcas_controller::config::ControllerConfig;
use mbcas_controller::health;
use mbcas_controller::reconciler::{self, Ctx};
use mbcas_controller::status::ControllerStatus;
use std::sync::Arc;

/// MBCAS Actuation Controller: reconciles AllocationRecords onto live pods.
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

    let mut cfg = ControllerConfig::load();
    if let Some(path) = &cli.config {
        let raw = std::fs::read_to_string(path)?;
        cfg = toml::from_str(&raw).unwrap_or(cfg);
    }

    info!("starting mbcas-controllerd");

    let mut kube_config = kube::Config::infer().await?;
    kube_config.read_timeout = Some(cfg.api_timeout);
    kube_config.write_timeout = Some(cfg.api_timeout);
    let client = Client::try_from(kube_config)?;
    let actuator = Actuator::new(client.clone());
    actuator.verify_resize_subresource_available().await?;
    let status = Arc::new(ControllerStatus::new(true));

    let health_port = cfg.health_port;
    let health_task = tokio::spawn(health::run(health_port, status.clone()));

    let reconciler_task = tokio::spawn(reconciler::run(Ctx { client, actuator, cfg, status }));

    tokio::select! {
        res = reconciler_task => {
            if let Err(err) = res {
                error!(error = %err, "reconciler task terminated unexpectedly");
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
