// SPDX-License-Identifier: MIT
//! Controller error taxonomy (spec §4.4, §7), one enum per subsystem
//! boundary, mirroring the Agent's `thiserror` layering.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("kube API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("resize not verified within {0:?}")]
    NotVerified(std::time::Duration),
    #[error("resize subresource forbidden for pod {0}")]
    Forbidden(String),
}
