//! Group key and id allocation
//!
//! Leaf L2 interface groups are addressed deterministically so equal
//! leaves requested by different objectives collapse onto one group.
//! Every other group draws an index from the injected
//! [`SequenceGenerator`] and stamps its type tag on top. L3 multicast ids
//! hold only 16 index bits, so they count per VLAN instead and take
//! their key from the sequence.

use crate::id::{GroupId, GroupKey};
use crate::service::SequenceGenerator;
use crate::types::{DeviceId, PortNumber, VlanId};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Key and id assigned to one group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Allocation {
    /// Correlation key
    pub key: GroupKey,
    /// Device group id
    pub id: GroupId,
}

/// Per-device allocator
#[derive(Clone)]
pub struct GroupIdAllocator {
    device_id: DeviceId,
    sequence: Arc<dyn SequenceGenerator>,
    multicast: Arc<DashMap<VlanId, u16>>,
}

impl fmt::Debug for GroupIdAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupIdAllocator")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

impl GroupIdAllocator {
    /// Create allocator for one device
    #[inline]
    #[must_use]
    pub fn new(device_id: DeviceId, sequence: Arc<dyn SequenceGenerator>) -> Self {
        Self {
            device_id,
            sequence,
            multicast: Arc::default(),
        }
    }

    /// Device this allocator serves
    #[inline]
    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Deterministic leaf allocation; consumes no sequence value
    #[must_use]
    pub fn l2_interface(&self, vlan: VlanId, port: PortNumber) -> Allocation {
        Allocation {
            key: GroupKey::l2_interface(&self.device_id, vlan, port),
            id: GroupId::l2_interface(vlan, port),
        }
    }

    /// L3 unicast next hop
    #[must_use]
    pub fn l3_unicast(&self) -> Allocation {
        Self::indexed(GroupId::l3_unicast(self.next_index()))
    }

    /// MPLS interface next hop
    #[must_use]
    pub fn mpls_interface(&self) -> Allocation {
        Self::indexed(GroupId::mpls_interface(self.next_index()))
    }

    /// MPLS L3 VPN label push
    #[must_use]
    pub fn mpls_l3vpn(&self) -> Allocation {
        Self::indexed(GroupId::mpls_l3vpn(self.next_index()))
    }

    /// L3 ECMP root
    #[must_use]
    pub fn l3_ecmp(&self) -> Allocation {
        Self::indexed(GroupId::l3_ecmp(self.next_index()))
    }

    /// L2 flood root; the id is fixed per VLAN, the key is unique per request
    #[must_use]
    pub fn l2_flood(&self, vlan: VlanId) -> Allocation {
        Allocation {
            key: GroupKey::l2_flood(self.next_index()),
            id: GroupId::l2_flood(vlan),
        }
    }

    /// L3 multicast root; ids count per VLAN and wrap after 65536
    #[must_use]
    pub fn l3_multicast(&self, vlan: VlanId) -> Allocation {
        let index = {
            let mut next = self.multicast.entry(vlan).or_insert(0);
            let index = *next;
            *next = next.wrapping_add(1);
            index
        };
        Allocation {
            key: GroupKey::l3_multicast(self.next_index()),
            id: GroupId::l3_multicast(vlan, u32::from(index)),
        }
    }

    fn indexed(id: GroupId) -> Allocation {
        Allocation { key: id.into(), id }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn next_index(&self) -> u32 {
        // layouts mask the index further; only the low bits matter
        (self.sequence.next() & u64::from(u32::MAX)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::GroupIdKind;
    use crate::service::AtomicSequence;

    fn allocator() -> GroupIdAllocator {
        GroupIdAllocator::new(DeviceId::new("of:1"), Arc::new(AtomicSequence::new()))
    }

    #[test]
    fn leaves_collapse() {
        let alloc = allocator();
        let vlan = VlanId::new(10).unwrap();
        let a = alloc.l2_interface(vlan, PortNumber::new(3));
        let b = alloc.l2_interface(vlan, PortNumber::new(3));
        assert_eq!(a, b);
        assert_eq!(a.id.raw(), 0x000a_0003);
    }

    #[test]
    fn indexed_allocations_are_unique() {
        let alloc = allocator();
        let a = alloc.l3_unicast();
        let b = alloc.l3_unicast();
        assert_ne!(a.key, b.key);
        assert_eq!(a.id.kind(), GroupIdKind::L3Unicast);
        assert_eq!(GroupKey::from(a.id), a.key);
    }

    #[test]
    fn every_type_is_tagged() {
        let alloc = allocator();
        let vlan = VlanId::new(5).unwrap();
        assert_eq!(alloc.mpls_interface().id.kind(), GroupIdKind::MplsInterface);
        assert_eq!(alloc.mpls_l3vpn().id.kind(), GroupIdKind::MplsL3Vpn);
        assert_eq!(alloc.l3_ecmp().id.kind(), GroupIdKind::L3Ecmp);
        assert_eq!(alloc.l3_multicast(vlan).id.kind(), GroupIdKind::L3Multicast);

        let flood = alloc.l2_flood(vlan);
        assert_eq!(flood.id.kind(), GroupIdKind::L2Flood);
        assert_eq!(flood.id.vlan(), Some(vlan));
        assert_ne!(alloc.l2_flood(vlan).key, flood.key);
    }

    #[test]
    fn multicast_ids_count_per_vlan() {
        let alloc = allocator();
        let a = VlanId::new(5).unwrap();
        let b = VlanId::new(6).unwrap();

        // other kinds advance the shared sequence but not the multicast index
        alloc.l3_unicast();
        let first = alloc.l3_multicast(a);
        alloc.l3_ecmp();
        let second = alloc.l3_multicast(a);
        let other = alloc.l3_multicast(b);

        assert_eq!(first.id.raw(), 0x6005_0000);
        assert_eq!(second.id.raw(), 0x6005_0001);
        assert_eq!(other.id.raw(), 0x6006_0000);
        assert_ne!(first.key, second.key);
        assert_ne!(first.key, GroupKey::from(first.id));
    }

    #[test]
    fn multicast_keys_stay_unique_past_the_index_wrap() {
        let alloc = allocator();
        let vlan = VlanId::new(7).unwrap();
        let first = alloc.l3_multicast(vlan);
        let mut last = first;
        for _ in 0..0x1_0000 {
            last = alloc.l3_multicast(vlan);
        }
        assert_eq!(last.id, first.id);
        assert_ne!(last.key, first.key);

        // clones share the per-vlan counter
        assert_eq!(alloc.clone().l3_multicast(vlan).id.raw(), 0x6007_0001);
    }
}
