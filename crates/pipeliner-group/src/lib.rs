//! Pipeliner Group - pipeline group model
//!
//! Foundation types shared by every pipeliner crate:
//! - Network primitives (devices, VLANs, ports, MAC addresses, prefixes)
//! - Treatments and selectors carried by next objectives
//! - Group identifiers with the OF-DPA per-type bit layouts
//! - Group descriptors, device-side groups and group events
//! - The device-facing group subsystem and sequence generator traits
//!
//! # Example
//!
//! ```rust
//! use pipeliner_group::{AtomicSequence, DeviceId, GroupIdAllocator, GroupIdKind, PortNumber, VlanId};
//! use std::sync::Arc;
//!
//! let allocator = GroupIdAllocator::new(DeviceId::new("of:1"), Arc::new(AtomicSequence::new()));
//! let leaf = allocator.l2_interface(VlanId::new(10).unwrap(), PortNumber::new(3));
//! assert_eq!(leaf.id.kind(), GroupIdKind::L2Interface);
//! assert_eq!(leaf.id.raw(), 0x000a_0003);
//! ```

#![warn(unreachable_pub)]

pub mod allocator;
pub mod group;
pub mod id;
pub mod service;
pub mod treatment;
pub mod types;

pub use allocator::{Allocation, GroupIdAllocator};
pub use group::{Group, GroupBucket, GroupDescriptor, GroupEvent, GroupEventKind, GroupType};
pub use id::{GroupId, GroupIdKind, GroupKey};
pub use service::{AtomicSequence, GroupListener, GroupService, SequenceGenerator};
pub use treatment::{Criterion, Instruction, Selector, SelectorBuilder, Treatment, TreatmentBuilder};
pub use types::{
    AppId, DeviceId, IpPrefix, MacAddress, ModelError, MplsLabel, NextId, PortNumber, VlanId,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
