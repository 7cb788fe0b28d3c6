// SPDX-License-Identifier: MIT
//! Node-local pod cache (spec §4.2, §6). Watches `Pod` objects via
//! `kube_runtime`'s reflector so the extractor and sampling loop read
//! declared resources/annotations without hitting the API server per tick —
//! the same "watch once, read from a local cache" shape the teacher uses for
//! its rate-limit/session state, generalized from an in-process map to a
//! `kube_runtime::reflector::Store`.

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Api, Client};
use mbcas_core::{PodId, PodResourceFacts};
use tracing::{info, warn};

use crate::config::AgentConfig;

#[derive(Clone)]
pub struct PodCache {
    store: reflector::Store<Pod>,
    node_name: String,
}

impl PodCache {
    /// Spawns the watch task and returns a handle whose `store` is kept in
    /// sync in the background. Callers read via [`PodCache::facts_for`] /
    /// [`PodCache::live_pod_ids`] without awaiting network calls.
    pub fn spawn(client: Client, node_name: String) -> Self {
        let api: Api<Pod> = Api::all(client);
        let (reader, writer) = reflector::store();
        let field_selector = format!("spec.nodeName={node_name}");
        let wc = watcher::Config::default().fields(&field_selector);

        tokio::spawn(async move {
            let stream = watcher(api, wc).default_backoff().reflect(writer).applied_objects();
            futures::pin_mut!(stream);
            loop {
                match stream.next().await {
                    Some(Ok(pod)) => {
                        info!(pod = %pod.metadata.name.clone().unwrap_or_default(), "pod watch event");
                    }
                    Some(Err(err)) => warn!(error = %err, "pod watch stream error"),
                    None => break,
                }
            }
        });

        Self {
            store: reader,
            node_name,
        }
    }

    /// Pod UIDs currently scheduled on this node, used by the sampling loop
    /// to discover which cgroups to read and by the tracker's TTL eviction.
    pub fn live_pod_ids(&self) -> Vec<PodId> {
        self.store
            .state()
            .iter()
            .filter_map(|pod| pod.metadata.name.clone())
            .collect()
    }

    pub fn uid_for(&self, pod_id: &PodId) -> Option<String> {
        self.store
            .state()
            .iter()
            .find(|pod| pod.metadata.name.as_deref() == Some(pod_id.as_str()))
            .and_then(|pod| pod.metadata.uid.clone())
    }

    pub fn namespace_for(&self, pod_id: &PodId) -> Option<String> {
        self.store
            .state()
            .iter()
            .find(|pod| pod.metadata.name.as_deref() == Some(pod_id.as_str()))
            .and_then(|pod| pod.metadata.namespace.clone())
    }

    /// Declared CPU request/limit/priority for one pod, per spec §4.2's
    /// extraction contract; `None` if the pod has been deleted since the
    /// caller last listed live IDs.
    pub fn facts_for(&self, pod_id: &PodId) -> Option<PodResourceFacts> {
        let pod = self
            .store
            .state()
            .iter()
            .find(|pod| pod.metadata.name.as_deref() == Some(pod_id.as_str()))
            .cloned()?;

        let spec = pod.spec.as_ref()?;
        let mut request_milli = 0u64;
        let mut limit_milli = 0u64;
        let mut has_limit = false;
        for container in &spec.containers {
            let Some(res) = &container.resources else { continue };
            if let Some(q) = res.requests.as_ref().and_then(|m| m.get("cpu")) {
                request_milli += mbcas_core::quantity::parse_millicores(&q.0).unwrap_or(0);
            }
            if let Some(q) = res.limits.as_ref().and_then(|m| m.get("cpu")) {
                has_limit = true;
                limit_milli += mbcas_core::quantity::parse_millicores(&q.0).unwrap_or(0);
            }
        }

        let priority_value = pod.spec.as_ref().and_then(|s| s.priority);
        let priority_multiplier_override = pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get("mbcas.io/priority-multiplier"))
            .and_then(|v| v.parse::<f64>().ok());

        Some(PodResourceFacts {
            request_milli: (request_milli > 0).then_some(request_milli),
            limit_milli: has_limit.then_some(limit_milli),
            priority_value,
            priority_multiplier_override,
        })
    }

    /// Coalition group key for an annotation-based grouping (spec §9
    /// experimental coalition bargaining), `None` if ungrouped.
    pub fn coalition_of(&self, cfg: &AgentConfig, pod_id: &PodId) -> Option<String> {
        self.store
            .state()
            .iter()
            .find(|pod| pod.metadata.name.as_deref() == Some(pod_id.as_str()))
            .and_then(|pod| pod.metadata.annotations.clone())
            .and_then(|a| a.get(&cfg.coalition_grouping_annotation).cloned())
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }
}

