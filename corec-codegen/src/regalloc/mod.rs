//! The Register File & Allocator (spec.md §2 component 5, §4.2).

pub mod allocator;
pub mod register;
pub mod ring;

pub use allocator::{
    allocate, classify, discard_overlapping, ensure_critical_minimum, flush_and_discard_all, Criticality,
    FlushAllMode, FlushFn, OverlapPolicy,
};
pub use register::{Tenant, VirtualRegister};
pub use ring::RegisterRing;
