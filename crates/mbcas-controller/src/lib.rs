// SPDX-License-Identifier: MIT
//! MBCAS Actuation Controller library: the actuator, safety gates, and
//! reconciler consumed by the `mbcas-controllerd` binary and by integration
//! tests.

pub mod actuator;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod reconciler;
pub mod safety;
pub mod status;
