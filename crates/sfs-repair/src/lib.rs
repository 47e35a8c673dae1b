#![forbid(unsafe_code)]
//! Staged repair passes over a volume session.
//!
//! Every pass works through the session overlay: findings are computed
//! against the live (overlay-first) view of the volume, fixes are staged
//! as whole-sector writes, and the backing media is never modified.

pub mod descriptors;

pub use descriptors::{
    DescriptorField, Disposition, GroupFinding, GroupScanReport, RepairMode, scan_descriptors,
};
