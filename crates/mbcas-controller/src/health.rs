// SPDX-License-Identifier: MIT
//! `/healthz`, `/readyz`, `/metrics` for the Controller (spec §6), the same
//! shape as the Agent's health server: state lives in a shared
//! [`ControllerStatus`] updated by the reconciler rather than a hardcoded
//! "ok".

use actix_web::{middleware, web, App, HttpResponse, HttpServer, Responder};
use tracing::info;

use crate::metrics;
use crate::status::ControllerStatus;

struct AppState {
    status: std::sync::Arc<ControllerStatus>,
}

async fn healthz(state: web::Data<AppState>) -> impl Responder {
    let snap = state.status.snapshot();
    let healthy = snap.resize_subresource_available;
    let body = serde_json::json!({
        "healthy": healthy,
        "resizeSubresourceAvailable": snap.resize_subresource_available,
        "lastReconcileTime": snap.last_reconcile_unix_secs,
        "startTime": snap.start_unix_secs,
        "uptime": snap.uptime_secs,
    });
    if healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

async fn readyz(state: web::Data<AppState>) -> impl Responder {
    let snap = state.status.snapshot();
    let ready = snap.resize_subresource_available && snap.has_reconciled;
    let body = serde_json::json!({
        "ready": ready,
        "hasReconciled": snap.has_reconciled,
    });
    if ready {
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

pub async fn run(port: u16, status: std::sync::Arc<ControllerStatus>) -> std::io::Result<()> {
    metrics::register_all();
    let state = web::Data::new(AppState { status });
    info!(port, "starting controller health server");

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
