// SPDX-License-Identifier: MIT
//! Agent error taxonomy (spec §7), one enum per subsystem boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CgroupError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed cpu.stat at {path}: missing key {key}")]
    MalformedStat { path: String, key: &'static str },
    #[error("no readable cpu.stat found under {root} at startup")]
    NoCgroupsDiscovered { root: String },
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("kube API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("conflict writing {0}, will retry")]
    Conflict(String),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),
    #[error(transparent)]
    Cgroup(#[from] CgroupError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}
