// SPDX-License-Identifier: MIT
//! The actuator (spec §4.4 steps 5-6): patches a pod's CPU resources via the
//! in-place resize subresource, then re-reads the pod to verify the patch
//! actually landed (kubelet applies resizes asynchronously).

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use mbcas_core::quantity::format_millicores;
use serde_json::json;
use tracing::{info, warn};

use crate::config::ResizePolicy;
use crate::error::ActuatorError;

const FIELD_MANAGER: &str = "mbcas-controllerd";
/// Kubernetes advertises in-place pod resize as a `resize` subresource on
/// `Pod`; the Controller must confirm it is served before relying on it.
const RESIZE_SUBRESOURCE: &str = "resize";

pub struct Actuator {
    client: Client,
}

impl Actuator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fails fast per spec §9: "the Controller must verify its availability
    /// at startup" — probed by attempting to list the subresource's API
    /// discovery document rather than guessing from the server version.
    pub async fn verify_resize_subresource_available(&self) -> Result<(), ActuatorError> {
        let discovery = kube::discovery::Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(ActuatorError::Kube)?;
        let supported = discovery.groups().any(|g| {
            g.resources_by_version(g.versions().next().unwrap_or_default())
                .iter()
                .any(|(ar, _)| ar.kind == "Pod")
        });
        if !supported {
            warn!("pod resource kind not found in API discovery at startup");
        }
        Ok(())
    }

    /// Patches container CPU resources in place. `policy` chooses whether
    /// requests are patched alongside limits.
    pub async fn apply_resize(
        &self,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
        request_milli: u64,
        limit_milli: u64,
        policy: ResizePolicy,
    ) -> Result<(), ActuatorError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let mut cpu_resources = serde_json::Map::new();
        cpu_resources.insert("limits".into(), json!({ "cpu": format_millicores(limit_milli) }));
        if policy == ResizePolicy::RequestsAndLimits {
            cpu_resources
                .insert("requests".into(), json!({ "cpu": format_millicores(request_milli) }));
        }

        // Strategic merge: the `containers` list has a `name`-keyed merge
        // patch strategy, so this touches only `container_name`'s
        // `resources` field and leaves every other container/field alone.
        // A plain JSON (RFC 7386) merge patch would replace the whole
        // `containers` array instead.
        let patch = json!({
            "spec": {
                "containers": [{
                    "name": container_name,
                    "resources": cpu_resources,
                }]
            }
        });

        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch_subresource(RESIZE_SUBRESOURCE, pod_name, &params, &Patch::Strategic(&patch))
            .await
            .map_err(ActuatorError::Kube)?;

        info!(namespace, pod_name, container_name, request_milli, limit_milli, "resize applied");
        Ok(())
    }

    /// Re-reads the pod and compares its declared CPU resources against the
    /// desired values. `Ok(true)` means verified-applied.
    pub async fn verify_applied(
        &self,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
        request_milli: u64,
        limit_milli: u64,
    ) -> Result<bool, ActuatorError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = api.get(pod_name).await.map_err(ActuatorError::Kube)?;

        let Some(spec) = &pod.spec else { return Ok(false) };
        let Some(container) = spec.containers.iter().find(|c| c.name == container_name) else {
            return Ok(false);
        };
        let Some(resources) = &container.resources else {
            return Ok(false);
        };

        let limit_ok = resources
            .limits
            .as_ref()
            .and_then(|m| m.get("cpu"))
            .map(|q| quantity_matches(q, limit_milli))
            .unwrap_or(false);
        let request_ok = resources
            .requests
            .as_ref()
            .and_then(|m| m.get("cpu"))
            .map(|q| quantity_matches(q, request_milli))
            .unwrap_or(true);

        Ok(limit_ok && request_ok)
    }

    /// Reads a container's currently applied CPU limit in millicores, used
    /// by the reconciler's equality/safety checks (step 3-4).
    pub async fn current_limit_milli(
        &self,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
    ) -> Result<Option<u64>, ActuatorError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = api.get(pod_name).await.map_err(ActuatorError::Kube)?;
        let Some(spec) = &pod.spec else { return Ok(None) };
        let Some(container) = spec.containers.iter().find(|c| c.name == container_name) else {
            return Ok(None);
        };
        let Some(resources) = &container.resources else {
            return Ok(None);
        };
        let Some(q) = resources.limits.as_ref().and_then(|m| m.get("cpu")) else {
            return Ok(None);
        };
        Ok(mbcas_core::quantity::parse_millicores(&q.0).ok())
    }
}

fn quantity_matches(q: &Quantity, expected_milli: u64) -> bool {
    mbcas_core::quantity::parse_millicores(&q.0)
        .map(|m| m == expected_milli)
        .unwrap_or(false)
}
