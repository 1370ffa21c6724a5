//! Groups as requested and as reported by the device
//!
//! - [`GroupDescriptor`] is what the pipeliner asks the group subsystem to create
//! - [`Group`] is what the subsystem reports back once the device holds it
//! - [`GroupEvent`] is the out-of-band completion notification, keyed by [`GroupKey`]

use crate::id::{GroupId, GroupKey};
use crate::treatment::Treatment;
use crate::types::{AppId, DeviceId, PortNumber};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Group type as understood by the switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupType {
    /// Single bucket, used for rewrite chains
    Indirect,
    /// Hash-selected bucket
    Select,
    /// Replicate to every bucket
    All,
    /// First live bucket
    Failover,
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Indirect => "INDIRECT",
            Self::Select => "SELECT",
            Self::All => "ALL",
            Self::Failover => "FAILOVER",
        };
        f.write_str(name)
    }
}

/// One bucket of a group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupBucket {
    /// Actions applied when the bucket is taken
    pub treatment: Treatment,
}

impl GroupBucket {
    /// Create bucket
    #[inline]
    #[must_use]
    pub fn new(treatment: Treatment) -> Self {
        Self { treatment }
    }
}

/// Request to create a group on one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescriptor {
    /// Target device
    pub device_id: DeviceId,
    /// Group type
    pub group_type: GroupType,
    /// Buckets in order
    pub buckets: Vec<GroupBucket>,
    /// Correlation key
    pub key: GroupKey,
    /// Explicit group id, if the pipeline dictates one
    pub group_id: Option<GroupId>,
    /// Requesting application
    pub app_id: AppId,
}

impl GroupDescriptor {
    /// Create descriptor
    #[must_use]
    pub fn new(
        device_id: DeviceId,
        group_type: GroupType,
        buckets: Vec<GroupBucket>,
        key: GroupKey,
        group_id: Option<GroupId>,
        app_id: AppId,
    ) -> Self {
        Self {
            device_id,
            group_type,
            buckets,
            key,
            group_id,
            app_id,
        }
    }
}

/// Group installed on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group id on the device
    pub id: GroupId,
    /// Correlation key
    pub key: GroupKey,
    /// Owning device
    pub device_id: DeviceId,
    /// Group type
    pub group_type: GroupType,
    /// Current buckets
    pub buckets: Vec<GroupBucket>,
    /// Owning application
    pub app_id: AppId,
}

impl Group {
    /// Materialize a descriptor under an assigned id
    #[must_use]
    pub fn from_descriptor(descriptor: &GroupDescriptor, id: GroupId) -> Self {
        Self {
            id,
            key: descriptor.key,
            device_id: descriptor.device_id.clone(),
            group_type: descriptor.group_type,
            buckets: descriptor.buckets.clone(),
            app_id: descriptor.app_id.clone(),
        }
    }

    /// Output port of the first bucket that has one
    #[must_use]
    pub fn first_output_port(&self) -> Option<PortNumber> {
        self.buckets
            .iter()
            .find_map(|bucket| bucket.treatment.output_port())
    }
}

/// Kind of group notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupEventKind {
    /// Group now present on the device
    Added,
    /// Group gone from the device
    Removed,
    /// Device rejected the group
    AddFailed,
    /// Buckets changed
    Updated,
}

/// Out-of-band group notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEvent {
    /// What happened
    pub kind: GroupEventKind,
    /// Key of the affected group
    pub key: GroupKey,
    /// Device id of the group, when known
    pub id: Option<GroupId>,
    /// Device the group belongs to
    pub device_id: DeviceId,
}

impl GroupEvent {
    /// Create event
    #[inline]
    #[must_use]
    pub fn new(kind: GroupEventKind, key: GroupKey, id: Option<GroupId>, device_id: DeviceId) -> Self {
        Self {
            kind,
            key,
            id,
            device_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VlanId;

    #[test]
    fn group_from_descriptor_keeps_fields() {
        let vlan = VlanId::new(10).unwrap();
        let port = PortNumber::new(4);
        let id = GroupId::l2_interface(vlan, port);
        let descriptor = GroupDescriptor::new(
            DeviceId::new("of:1"),
            GroupType::Indirect,
            vec![GroupBucket::new(
                Treatment::builder().pop_vlan().output(port).build(),
            )],
            GroupKey::from(id),
            Some(id),
            AppId::new("test"),
        );

        let group = Group::from_descriptor(&descriptor, id);
        assert_eq!(group.key, descriptor.key);
        assert_eq!(group.first_output_port(), Some(port));
        assert_eq!(group.group_type, GroupType::Indirect);
    }

    #[test]
    fn group_without_output_has_no_port() {
        let id = GroupId::l3_ecmp(1);
        let group = Group {
            id,
            key: id.into(),
            device_id: DeviceId::new("of:1"),
            group_type: GroupType::Select,
            buckets: vec![GroupBucket::new(
                Treatment::builder().group(GroupId::l3_unicast(2)).build(),
            )],
            app_id: AppId::new("test"),
        };
        assert_eq!(group.first_output_port(), None);
    }
}
