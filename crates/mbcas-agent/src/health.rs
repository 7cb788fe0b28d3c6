// SPDX-License-Identifier: MIT
//! `/healthz`, `/readyz`, `/metrics` (spec §6), the same
//! `HttpServer::new(...).route(...)` shape as the teacher's `web_server.rs`,
//! run as a third Tokio task alongside the sampling and write loops.

use actix_web::{middleware, web, App, HttpResponse, HttpServer, Responder};
use tracing::info;

use crate::config::AgentConfig;
use crate::metrics;
use crate::status::AgentStatus;
use crate::tracker::DemandTracker;

struct AppState {
    tracker: std::sync::Arc<DemandTracker>,
    status: std::sync::Arc<AgentStatus>,
    startup_grace_period: std::time::Duration,
}

async fn healthz(state: web::Data<AppState>) -> impl Responder {
    let snap = state.status.snapshot();
    let in_grace_period = snap.uptime_secs < state.startup_grace_period.as_secs();
    let healthy = snap.cgroup_detection;
    let body = serde_json::json!({
        "healthy": healthy,
        "cgroupDetection": snap.cgroup_detection,
        "podsTracked": state.tracker.len(),
        "lastSampleTime": snap.last_sample_unix_secs,
        "lastWriteTime": snap.last_write_unix_secs,
        "startTime": snap.start_unix_secs,
        "uptime": snap.uptime_secs,
        "inGracePeriod": in_grace_period,
    });
    if healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

async fn readyz(state: web::Data<AppState>) -> impl Responder {
    let snap = state.status.snapshot();
    let body = serde_json::json!({
        "ready": snap.has_sampled,
        "podsTracked": state.tracker.len(),
    });
    if snap.has_sampled {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

async fn metrics_handler() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::encode())
}

pub async fn run(
    cfg: AgentConfig,
    tracker: std::sync::Arc<DemandTracker>,
    status: std::sync::Arc<AgentStatus>,
) -> std::io::Result<()> {
    metrics::register_all();
    let state = web::Data::new(AppState {
        tracker,
        status,
        startup_grace_period: cfg.startup_grace_period,
    });
    let port = cfg.health_port;

    info!(port, "starting agent health server");

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .route("/healthz", web::get().to(healthz))
            .route("/readyz", web::get().to(readyz))
            .route("/metrics", web::get().to(metrics_handler))
    })
    .bind(("0.0.0.0", port))?
    .workers(2)
    .run()
    .await
}
