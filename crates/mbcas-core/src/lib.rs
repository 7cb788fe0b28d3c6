// SPDX-License-Identifier: MIT
//! MBCAS core: the shared data contracts and the three pure subsystems that
//! do not touch the network or the filesystem — the demand sampler/smoother,
//! the parameter extractor, and the market-clearing allocator. Consumed by
//! `mbcas-agent`; the `AllocationRecord` CRD type is also consumed by
//! `mbcas-controller`.

pub mod allocator;
pub mod extractor;
pub mod quantity;
pub mod sampler;
pub mod types;

pub use allocator::{allocate, AllocatorConfig};
pub use extractor::{extract_params, ExtractorConfig, PodResourceFacts};
pub use sampler::{update as update_demand, SamplerConfig};
pub use types::{
    AllocationRecord, AllocationRecordSpec, AllocationRecordStatus, AllocationResult,
    DemandSample, DemandState, Mode, Phase, PodAllocation, PodId, PodParams, Reason,
};
