// SPDX-License-Identifier: MIT
//! The reconciler (spec §4.4): `kube_runtime::Controller` drives one
//! `reconcile()` call per `AllocationRecord` change or periodic requeue,
//! serialized per object key by the framework's own work queue — the
//! idiomatic substitute for hand-rolling "the orchestrator framework
//! provides the work queue and per-key serialization" (spec §5).

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use mbcas_core::{quantity, AllocationRecord, AllocationRecordStatus, Phase, Reason};
use tracing::{error, info, warn};

use crate::actuator::Actuator;
use crate::config::ControllerConfig;
use crate::error::ActuatorError;
use crate::metrics;
use crate::safety::{self, SafetyConfig};
use crate::status::ControllerStatus;

const CONTROLLER_NAME: &str = "mbcas-controllerd";

pub struct Ctx {
    pub client: Client,
    pub actuator: Actuator,
    pub cfg: ControllerConfig,
    pub status: Arc<ControllerStatus>,
}

/// Emits a human-readable Kubernetes `Event` on an `AllocationRecord` phase
/// transition (spec §4.4 step 7, §7): a third, audit-facing observability
/// channel alongside `status` patches and Prometheus counters.
async fn emit_phase_event(
    client: &Client,
    record: &AllocationRecord,
    event_type: EventType,
    reason: &str,
    note: String,
) {
    let reporter = Reporter::from(CONTROLLER_NAME.to_string());
    let recorder = Recorder::new(client.clone(), reporter, record.object_ref(&()));
    if let Err(err) = recorder
        .publish(&Event {
            type_: event_type,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        })
        .await
    {
        warn!(error = %err, record = %record.name_any(), "failed to publish phase-transition event");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("kube API error: {0}")]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
}

/// The only container name the Agent's `extract_params` sums over is a
/// pod's first declared container — the Controller patches the same one.
fn primary_container_name(pod: &k8s_openapi::api::core::v1::Pod) -> Option<String> {
    pod.spec.as_ref()?.containers.first().map(|c| c.name.clone())
}

fn is_opted_out(pod: &k8s_openapi::api::core::v1::Pod) -> bool {
    pod.labels().get("managed").map(|v| v == "false").unwrap_or(false)
}

fn skip_guaranteed_disabled(pod: &k8s_openapi::api::core::v1::Pod) -> bool {
    pod.annotations()
        .get("skip-guaranteed")
        .map(|v| v == "false")
        .unwrap_or(false)
}

fn is_guaranteed_qos(pod: &k8s_openapi::api::core::v1::Pod) -> bool {
    let Some(spec) = &pod.spec else { return false };
    !spec.containers.is_empty()
        && spec.containers.iter().all(|c| {
            let Some(res) = &c.resources else { return false };
            let req = res.requests.as_ref().and_then(|m| m.get("cpu"));
            let lim = res.limits.as_ref().and_then(|m| m.get("cpu"));
            matches!((req, lim), (Some(r), Some(l)) if r.0 == l.0)
        })
}

async fn patch_status(
    api: &Api<AllocationRecord>,
    name: &str,
    status: AllocationRecordStatus,
) -> Result<(), kube::Error> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

/// Patches `status` and, if `status.phase` differs from the phase the
/// record carried on entry, emits the spec §4.4 step 7 transition event.
async fn apply_status(
    client: &Client,
    api: &Api<AllocationRecord>,
    record: &AllocationRecord,
    name: &str,
    prev_phase: Phase,
    status: AllocationRecordStatus,
) -> Result<(), kube::Error> {
    let new_phase = status.phase;
    let reason = status.reason.clone();
    patch_status(api, name, status).await?;
    if new_phase != prev_phase {
        let event_type = match new_phase {
            Phase::Failed => EventType::Warning,
            Phase::Pending | Phase::Applied => EventType::Normal,
        };
        emit_phase_event(
            client,
            record,
            event_type,
            &reason,
            format!("{prev_phase} -> {new_phase} ({reason})"),
        )
        .await;
    }
    Ok(())
}

async fn reconcile(record: Arc<AllocationRecord>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    let name = record.name_any();
    let namespace = record.spec.namespace.clone();
    let api: Api<AllocationRecord> = Api::namespaced(ctx.client.clone(), &namespace);
    let pods: Api<k8s_openapi::api::core::v1::Pod> = Api::namespaced(ctx.client.clone(), &namespace);
    let prev_phase = record.status.as_ref().map(|s| s.phase).unwrap_or_default();

    let pod = match pods.get_opt(&record.spec.pod_name).await? {
        Some(pod) => pod,
        None => {
            apply_status(
                &ctx.client,
                &api,
                &record,
                &name,
                prev_phase,
                AllocationRecordStatus {
                    phase: Phase::Failed,
                    reason: Reason::PodNotFound.to_string(),
                    ..record.status.clone().unwrap_or_default()
                },
            )
            .await?;
            return Ok(Action::await_change());
        }
    };

    if is_opted_out(&pod) {
        apply_status(
            &ctx.client,
            &api,
            &record,
            &name,
            prev_phase,
            AllocationRecordStatus {
                phase: Phase::Applied,
                reason: Reason::Excluded.to_string(),
                ..record.status.clone().unwrap_or_default()
            },
        )
        .await?;
        return Ok(Action::await_change());
    }

    if is_guaranteed_qos(&pod) && !skip_guaranteed_disabled(&pod) {
        apply_status(
            &ctx.client,
            &api,
            &record,
            &name,
            prev_phase,
            AllocationRecordStatus {
                phase: Phase::Applied,
                reason: Reason::GuaranteedQoS.to_string(),
                ..record.status.clone().unwrap_or_default()
            },
        )
        .await?;
        return Ok(Action::await_change());
    }

    let Some(container_name) = primary_container_name(&pod) else {
        apply_status(
            &ctx.client,
            &api,
            &record,
            &name,
            prev_phase,
            AllocationRecordStatus {
                phase: Phase::Failed,
                reason: Reason::PodNotFound.to_string(),
                ..record.status.clone().unwrap_or_default()
            },
        )
        .await?;
        return Ok(Action::await_change());
    };

    let (desired_request_milli, desired_limit_milli) = match (
        quantity::parse_millicores(&record.spec.desired_cpu_request),
        quantity::parse_millicores(&record.spec.desired_cpu_limit),
    ) {
        (Ok(req), Ok(lim)) => (req, lim),
        _ => {
            apply_status(
                &ctx.client,
                &api,
                &record,
                &name,
                prev_phase,
                AllocationRecordStatus {
                    phase: Phase::Failed,
                    reason: Reason::InvalidDesired.to_string(),
                    last_attempt_time: Some(Time(k8s_openapi::chrono::Utc::now())),
                    ..record.status.clone().unwrap_or_default()
                },
            )
            .await?;
            return Ok(Action::requeue(Duration::from_secs(30)));
        }
    };

    let current_limit_milli = ctx
        .actuator
        .current_limit_milli(&namespace, &record.spec.pod_name, &container_name)
        .await?
        .unwrap_or(0);

    if current_limit_milli == desired_limit_milli {
        apply_status(
            &ctx.client,
            &api,
            &record,
            &name,
            prev_phase,
            AllocationRecordStatus {
                phase: Phase::Applied,
                reason: Reason::Applied.to_string(),
                applied_cpu_limit: Some(record.spec.desired_cpu_limit.clone()),
                applied_cpu_request: Some(record.spec.desired_cpu_request.clone()),
                ..record.status.clone().unwrap_or_default()
            },
        )
        .await?;
        return Ok(Action::requeue(Duration::from_secs(60)));
    }

    let safety_cfg = SafetyConfig {
        cooldown: ctx.cfg.cooldown,
        max_abs_delta_milli: ctx.cfg.max_abs_delta_milli,
        max_factor: ctx.cfg.max_factor,
    };
    let time_since_last_applied = record
        .status
        .as_ref()
        .and_then(|s| s.last_applied_time.as_ref())
        .and_then(|t| {
            let now = k8s_openapi::chrono::Utc::now();
            (now - t.0).to_std().ok()
        });

    if let Err(reason) = safety::check(
        &safety_cfg,
        time_since_last_applied,
        desired_limit_milli,
        current_limit_milli,
    ) {
        metrics::SAFETY_GATE_BLOCKS_TOTAL.with_label_values(&[&reason.to_string()]).inc();
        warn!(pod = %record.spec.pod_name, reason = %reason, "safety gate blocked resize");
        apply_status(
            &ctx.client,
            &api,
            &record,
            &name,
            prev_phase,
            AllocationRecordStatus {
                phase: Phase::Pending,
                reason: reason.to_string(),
                last_attempt_time: Some(Time(k8s_openapi::chrono::Utc::now())),
                ..record.status.clone().unwrap_or_default()
            },
        )
        .await?;
        return Ok(Action::requeue(Duration::from_secs(5)));
    }

    let apply_result = ctx
        .actuator
        .apply_resize(
            &namespace,
            &record.spec.pod_name,
            &container_name,
            desired_request_milli,
            desired_limit_milli,
            ctx.cfg.resize_policy,
        )
        .await;

    if let Err(err) = apply_result {
        metrics::RESIZES_TOTAL.with_label_values(&["error"]).inc();
        error!(pod = %record.spec.pod_name, error = %err, "actuator failed to apply resize");
        apply_status(
            &ctx.client,
            &api,
            &record,
            &name,
            prev_phase,
            AllocationRecordStatus {
                phase: Phase::Pending,
                reason: Reason::ActuatorError.to_string(),
                last_attempt_time: Some(Time(k8s_openapi::chrono::Utc::now())),
                ..record.status.clone().unwrap_or_default()
            },
        )
        .await?;
        return Ok(Action::requeue(Duration::from_secs(10)));
    }

    let verified = ctx
        .actuator
        .verify_applied(
            &namespace,
            &record.spec.pod_name,
            &container_name,
            desired_request_milli,
            desired_limit_milli,
        )
        .await
        .unwrap_or(false);

    let now = Time(k8s_openapi::chrono::Utc::now());
    if verified {
        metrics::RESIZES_TOTAL.with_label_values(&["verified"]).inc();
        metrics::RECONCILES_TOTAL.with_label_values(&["applied"]).inc();
        info!(pod = %record.spec.pod_name, "resize verified");
        apply_status(
            &ctx.client,
            &api,
            &record,
            &name,
            prev_phase,
            AllocationRecordStatus {
                phase: Phase::Applied,
                reason: Reason::Applied.to_string(),
                applied_cpu_limit: Some(record.spec.desired_cpu_limit.clone()),
                applied_cpu_request: Some(record.spec.desired_cpu_request.clone()),
                last_applied_time: Some(now.clone()),
                last_attempt_time: Some(now),
                ..record.status.clone().unwrap_or_default()
            },
        )
        .await?;
        Ok(Action::requeue(Duration::from_secs(60)))
    } else {
        metrics::RESIZES_TOTAL.with_label_values(&["unverified"]).inc();
        apply_status(
            &ctx.client,
            &api,
            &record,
            &name,
            prev_phase,
            AllocationRecordStatus {
                phase: Phase::Pending,
                reason: Reason::ResizeNotVerified.to_string(),
                last_attempt_time: Some(now),
                ..record.status.clone().unwrap_or_default()
            },
        )
        .await?;
        Ok(Action::requeue(ctx.cfg.verify_timeout))
    }
}

fn error_policy(_record: Arc<AllocationRecord>, err: &ReconcileError, _ctx: Arc<Ctx>) -> Action {
    error!(error = %err, "reconcile failed, retrying with backoff");
    Action::requeue(Duration::from_secs(15))
}

pub async fn run(ctx: Ctx) {
    let ctx = Arc::new(ctx);
    let api: Api<AllocationRecord> = Api::all(ctx.client.clone());
    let status = ctx.status.clone();

    Controller::new(api, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async {
            match res {
                Ok((object, _action)) => {
                    status.mark_reconcile();
                    info!(record = %object.name, "reconciled");
                }
                Err(err) => warn!(error = %err, "reconcile error surfaced to controller loop"),
            }
        })
        .await;
}
