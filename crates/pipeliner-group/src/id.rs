//! Group identifiers
//!
//! OF-DPA requires group ids of a fixed form, one layout per group type:
//!
//! | type            | layout                                   |
//! |-----------------|------------------------------------------|
//! | L2 interface    | `<4b 0x0><12b vlan><16b port>`           |
//! | L3 unicast      | `<4b 0x2><28b index>`                    |
//! | L2 flood        | `<4b 0x4><12b vlan><16b index>`          |
//! | L3 multicast    | `<4b 0x6><12b vlan><16b index>`          |
//! | L3 ECMP         | `<4b 0x7><28b index>`                    |
//! | MPLS interface  | `<4b 0x9><4b 0x0><24b index>`            |
//! | MPLS L3 VPN     | `<4b 0x9><4b 0x2><24b index>`            |
//!
//! [`GroupKey`] is the correlation id echoed back by the group subsystem.
//! Leaf keys are derived deterministically from `(device, vlan, port)` so
//! equal leaves collapse onto one group; every other key comes from a
//! sequence index.

use crate::types::{DeviceId, PortNumber, VlanId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag of L2 interface groups
pub const L2_INTERFACE_TYPE: u32 = 0x0000_0000;
/// Type tag of L3 unicast groups
pub const L3_UNICAST_TYPE: u32 = 0x2000_0000;
/// Type tag of L2 flood groups
pub const L2_FLOOD_TYPE: u32 = 0x4000_0000;
/// Type tag of L3 multicast groups
pub const L3_MULTICAST_TYPE: u32 = 0x6000_0000;
/// Type tag of L3 ECMP groups
pub const L3_ECMP_TYPE: u32 = 0x7000_0000;
/// Type tag of MPLS interface groups
pub const MPLS_INTERFACE_TYPE: u32 = 0x9000_0000;
/// Type and subtype tag of MPLS L3 VPN groups
pub const MPLS_L3VPN_SUBTYPE: u32 = 0x9200_0000;

/// Bits below the type nibble
pub const TYPE_MASK: u32 = 0x0fff_ffff;
/// Bits below the type and subtype nibbles
pub const SUBTYPE_MASK: u32 = 0x00ff_ffff;
/// Bits below the vlan field
pub const TYPE_VLAN_MASK: u32 = 0x0000_ffff;

const PORT_LOWER_BITS_MASK: u64 = 0x3f;

/// Group type decoded from the top bits of a [`GroupId`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupIdKind {
    /// Leaf group: pop/push vlan and output
    L2Interface,
    /// Next-hop rewrite pointing at an L2 interface
    L3Unicast,
    /// Per-VLAN broadcast
    L2Flood,
    /// IP multicast replication
    L3Multicast,
    /// Hashed selection across next hops
    L3Ecmp,
    /// Next-hop rewrite for labelled traffic
    MplsInterface,
    /// VPN label push
    MplsL3Vpn,
    /// Tag not produced by this pipeline
    Unknown,
}

impl fmt::Display for GroupIdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::L2Interface => "l2-interface",
            Self::L3Unicast => "l3-unicast",
            Self::L2Flood => "l2-flood",
            Self::L3Multicast => "l3-multicast",
            Self::L3Ecmp => "l3-ecmp",
            Self::MplsInterface => "mpls-interface",
            Self::MplsL3Vpn => "mpls-l3vpn",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Numeric group id as programmed on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(u32);

impl GroupId {
    /// Wrap a raw id
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get raw id
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// L2 interface id for `(vlan, port)`
    #[inline]
    #[must_use]
    pub fn l2_interface(vlan: VlanId, port: PortNumber) -> Self {
        let port_bits = (port.raw() & u64::from(TYPE_VLAN_MASK)) as u32;
        Self(L2_INTERFACE_TYPE | (u32::from(vlan.raw()) << 16) | port_bits)
    }

    /// L3 unicast id for a sequence index
    #[inline]
    #[must_use]
    pub fn l3_unicast(index: u32) -> Self {
        Self(L3_UNICAST_TYPE | (TYPE_MASK & index))
    }

    /// L2 flood id; there is one flood group per VLAN so the index is always zero
    #[inline]
    #[must_use]
    pub fn l2_flood(vlan: VlanId) -> Self {
        Self(L2_FLOOD_TYPE | (u32::from(vlan.raw()) << 16))
    }

    /// L3 multicast id for `(vlan, index)`
    ///
    /// Only 16 index bits fit, so the index wraps every 65536 groups of
    /// one VLAN. Correlation keys of multicast roots come from
    /// [`GroupKey::l3_multicast`] and stay unique past the wrap.
    #[inline]
    #[must_use]
    pub fn l3_multicast(vlan: VlanId, index: u32) -> Self {
        Self(L3_MULTICAST_TYPE | (u32::from(vlan.raw()) << 16) | (TYPE_VLAN_MASK & index))
    }

    /// L3 ECMP id for a sequence index
    #[inline]
    #[must_use]
    pub fn l3_ecmp(index: u32) -> Self {
        Self(L3_ECMP_TYPE | (TYPE_MASK & index))
    }

    /// MPLS interface id for a sequence index
    #[inline]
    #[must_use]
    pub fn mpls_interface(index: u32) -> Self {
        Self(MPLS_INTERFACE_TYPE | (SUBTYPE_MASK & index))
    }

    /// MPLS L3 VPN id for a sequence index
    #[inline]
    #[must_use]
    pub fn mpls_l3vpn(index: u32) -> Self {
        Self(MPLS_L3VPN_SUBTYPE | (SUBTYPE_MASK & index))
    }

    /// Decode the group type from the tag bits
    #[must_use]
    pub fn kind(self) -> GroupIdKind {
        match self.0 >> 28 {
            0x0 => GroupIdKind::L2Interface,
            0x2 => GroupIdKind::L3Unicast,
            0x4 => GroupIdKind::L2Flood,
            0x6 => GroupIdKind::L3Multicast,
            0x7 => GroupIdKind::L3Ecmp,
            0x9 => match (self.0 >> 24) & 0xf {
                0x0 => GroupIdKind::MplsInterface,
                0x2 => GroupIdKind::MplsL3Vpn,
                _ => GroupIdKind::Unknown,
            },
            _ => GroupIdKind::Unknown,
        }
    }

    /// VLAN field for the VLAN-scoped layouts
    #[must_use]
    pub fn vlan(self) -> Option<VlanId> {
        match self.kind() {
            GroupIdKind::L2Interface | GroupIdKind::L2Flood | GroupIdKind::L3Multicast => {
                VlanId::new(((self.0 >> 16) & 0x0fff) as u16).ok()
            }
            _ => None,
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Correlation key between a requested group and its confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(u32);

impl GroupKey {
    /// Wrap a raw key
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get raw key
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Deterministic L2 interface key
    ///
    /// The low 6 bits keep the raw port number (ports are usually below 64);
    /// the remaining 28 bits hash the device, VLAN and upper port bits.
    /// The top nibble stays the L2 interface tag.
    #[must_use]
    pub fn l2_interface(device_id: &DeviceId, vlan: VlanId, port: PortNumber) -> Self {
        let lower = (port.raw() & PORT_LOWER_BITS_MASK) as u32;
        let higher = port.raw() & !PORT_LOWER_BITS_MASK;

        let mut hasher = blake3::Hasher::new();
        hasher.update(device_id.as_str().as_bytes());
        hasher.update(&vlan.raw().to_be_bytes());
        hasher.update(&higher.to_be_bytes());
        let digest = hasher.finalize();
        let bytes = digest.as_bytes();
        let hash = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

        Self(L2_INTERFACE_TYPE | (TYPE_MASK & (hash << 6)) | lower)
    }

    /// Key of an L2 flood group; flood ids repeat per VLAN so the key carries the index
    #[inline]
    #[must_use]
    pub fn l2_flood(index: u32) -> Self {
        Self(L2_FLOOD_TYPE | (TYPE_MASK & index))
    }

    /// Key of an L3 multicast group; the id holds only 16 index bits so the key carries the full index
    #[inline]
    #[must_use]
    pub fn l3_multicast(index: u32) -> Self {
        Self(L3_MULTICAST_TYPE | (TYPE_MASK & index))
    }
}

impl From<GroupId> for GroupKey {
    /// Sequence-allocated groups use their unique id as key
    fn from(id: GroupId) -> Self {
        Self(id.raw())
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gk:{}", hex::encode(self.0.to_be_bytes()))
    }
}
