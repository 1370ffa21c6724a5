//! Treatments and selectors
//!
//! A [`Treatment`] is the ordered action set of one output path (one bucket
//! of a next objective). A [`Selector`] carries the optional metadata an
//! application attaches to an objective, such as the egress VLAN or a
//! multicast destination.

use crate::id::GroupId;
use crate::types::{IpPrefix, MacAddress, MplsLabel, PortNumber, VlanId};
use serde::{Deserialize, Serialize};

/// A single action in a treatment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instruction {
    /// Send out of a port
    Output(PortNumber),
    /// Continue processing in another group
    Group(GroupId),
    /// Rewrite source MAC
    SetEthSrc(MacAddress),
    /// Rewrite destination MAC
    SetEthDst(MacAddress),
    /// Rewrite VLAN id
    SetVlanId(VlanId),
    /// Rewrite VLAN priority
    SetVlanPcp(u8),
    /// Push a VLAN header
    PushVlan,
    /// Pop the outer VLAN header
    PopVlan,
    /// Push an MPLS header
    PushMpls,
    /// Pop the outer MPLS header
    PopMpls,
    /// Set the outer MPLS label
    SetMplsLabel(MplsLabel),
    /// Set the bottom-of-stack bit
    SetMplsBos(bool),
    /// Decrement MPLS TTL
    DecMplsTtl,
    /// Copy TTL outwards
    CopyTtlOut,
    /// Enqueue on a port queue
    SetQueue(u32),
    /// Apply a meter
    Meter(u32),
}

impl Instruction {
    /// True for header rewrites at layer 2 (Ethernet, VLAN, MPLS)
    #[must_use]
    pub fn is_l2_modification(&self) -> bool {
        matches!(
            self,
            Self::SetEthSrc(_)
                | Self::SetEthDst(_)
                | Self::SetVlanId(_)
                | Self::SetVlanPcp(_)
                | Self::PushVlan
                | Self::PopVlan
                | Self::PushMpls
                | Self::PopMpls
                | Self::SetMplsLabel(_)
                | Self::SetMplsBos(_)
                | Self::DecMplsTtl
        )
    }
}

/// Ordered action set
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Treatment {
    instructions: Vec<Instruction>,
}

impl Treatment {
    /// Start building a treatment
    #[inline]
    #[must_use]
    pub fn builder() -> TreatmentBuilder {
        TreatmentBuilder::default()
    }

    /// All instructions in order
    #[inline]
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// First output port, if any
    #[must_use]
    pub fn output_port(&self) -> Option<PortNumber> {
        self.instructions.iter().find_map(|i| match i {
            Instruction::Output(port) => Some(*port),
            _ => None,
        })
    }

    /// First VLAN id rewrite, if any
    #[must_use]
    pub fn vlan_id(&self) -> Option<VlanId> {
        self.instructions.iter().find_map(|i| match i {
            Instruction::SetVlanId(vlan) => Some(*vlan),
            _ => None,
        })
    }

    /// First group reference, if any
    #[must_use]
    pub fn group(&self) -> Option<GroupId> {
        self.instructions.iter().find_map(|i| match i {
            Instruction::Group(id) => Some(*id),
            _ => None,
        })
    }

    /// True when the treatment rewrites a source or destination MAC
    #[must_use]
    pub fn rewrites_mac(&self) -> bool {
        self.instructions
            .iter()
            .any(|i| matches!(i, Instruction::SetEthSrc(_) | Instruction::SetEthDst(_)))
    }

    /// True when the treatment pops a VLAN header
    #[must_use]
    pub fn pops_vlan(&self) -> bool {
        self.instructions.contains(&Instruction::PopVlan)
    }

    /// Number of MPLS headers pushed
    #[must_use]
    pub fn mpls_pushes(&self) -> usize {
        self.instructions
            .iter()
            .filter(|i| matches!(i, Instruction::PushMpls))
            .count()
    }

    /// First MPLS label set, i.e. the innermost label pushed
    #[must_use]
    pub fn mpls_label(&self) -> Option<MplsLabel> {
        self.instructions.iter().find_map(|i| match i {
            Instruction::SetMplsLabel(label) => Some(*label),
            _ => None,
        })
    }

    /// Number of instructions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True when there are no instructions
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Fluent builder for [`Treatment`]
#[derive(Debug, Clone, Default)]
pub struct TreatmentBuilder {
    instructions: Vec<Instruction>,
}

impl TreatmentBuilder {
    /// Append any instruction
    #[inline]
    #[must_use]
    pub fn add(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    /// Output to port
    #[inline]
    #[must_use]
    pub fn output(self, port: PortNumber) -> Self {
        self.add(Instruction::Output(port))
    }

    /// Point at another group
    #[inline]
    #[must_use]
    pub fn group(self, id: GroupId) -> Self {
        self.add(Instruction::Group(id))
    }

    /// Rewrite source MAC
    #[inline]
    #[must_use]
    pub fn set_eth_src(self, mac: MacAddress) -> Self {
        self.add(Instruction::SetEthSrc(mac))
    }

    /// Rewrite destination MAC
    #[inline]
    #[must_use]
    pub fn set_eth_dst(self, mac: MacAddress) -> Self {
        self.add(Instruction::SetEthDst(mac))
    }

    /// Rewrite VLAN id
    #[inline]
    #[must_use]
    pub fn set_vlan_id(self, vlan: VlanId) -> Self {
        self.add(Instruction::SetVlanId(vlan))
    }

    /// Push VLAN header
    #[inline]
    #[must_use]
    pub fn push_vlan(self) -> Self {
        self.add(Instruction::PushVlan)
    }

    /// Pop VLAN header
    #[inline]
    #[must_use]
    pub fn pop_vlan(self) -> Self {
        self.add(Instruction::PopVlan)
    }

    /// Push MPLS header
    #[inline]
    #[must_use]
    pub fn push_mpls(self) -> Self {
        self.add(Instruction::PushMpls)
    }

    /// Set MPLS label
    #[inline]
    #[must_use]
    pub fn set_mpls_label(self, label: MplsLabel) -> Self {
        self.add(Instruction::SetMplsLabel(label))
    }

    /// Set MPLS bottom-of-stack bit
    #[inline]
    #[must_use]
    pub fn set_mpls_bos(self, bos: bool) -> Self {
        self.add(Instruction::SetMplsBos(bos))
    }

    /// Copy TTL outwards
    #[inline]
    #[must_use]
    pub fn copy_ttl_out(self) -> Self {
        self.add(Instruction::CopyTtlOut)
    }

    /// Finish
    #[inline]
    #[must_use]
    pub fn build(self) -> Treatment {
        Treatment {
            instructions: self.instructions,
        }
    }
}

/// Match criterion carried in objective metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Criterion {
    /// VLAN id
    VlanVid(VlanId),
    /// IPv4 destination
    Ipv4Dst(IpPrefix),
}

/// Set of match criteria
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector {
    criteria: Vec<Criterion>,
}

impl Selector {
    /// Start building a selector
    #[inline]
    #[must_use]
    pub fn builder() -> SelectorBuilder {
        SelectorBuilder::default()
    }

    /// All criteria
    #[inline]
    #[must_use]
    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    /// VLAN id criterion, if present
    #[must_use]
    pub fn vlan_id(&self) -> Option<VlanId> {
        self.criteria.iter().find_map(|c| match c {
            Criterion::VlanVid(vlan) => Some(*vlan),
            _ => None,
        })
    }

    /// IPv4 destination criterion, if present
    #[must_use]
    pub fn ipv4_dst(&self) -> Option<IpPrefix> {
        self.criteria.iter().find_map(|c| match c {
            Criterion::Ipv4Dst(prefix) => Some(*prefix),
            _ => None,
        })
    }
}

/// Fluent builder for [`Selector`]
#[derive(Debug, Clone, Default)]
pub struct SelectorBuilder {
    criteria: Vec<Criterion>,
}

impl SelectorBuilder {
    /// Match VLAN id
    #[inline]
    #[must_use]
    pub fn match_vlan_id(mut self, vlan: VlanId) -> Self {
        self.criteria.push(Criterion::VlanVid(vlan));
        self
    }

    /// Match IPv4 destination
    #[inline]
    #[must_use]
    pub fn match_ipv4_dst(mut self, prefix: IpPrefix) -> Self {
        self.criteria.push(Criterion::Ipv4Dst(prefix));
        self
    }

    /// Finish
    #[inline]
    #[must_use]
    pub fn build(self) -> Selector {
        Selector {
            criteria: self.criteria,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        MacAddress::new([0, 1, 2, 3, 4, 5])
    }

    #[test]
    fn treatment_queries() {
        let treatment = Treatment::builder()
            .set_eth_dst(mac())
            .set_vlan_id(VlanId::new(20).unwrap())
            .output(PortNumber::new(7))
            .build();

        assert!(treatment.rewrites_mac());
        assert_eq!(treatment.output_port(), Some(PortNumber::new(7)));
        assert_eq!(treatment.vlan_id(), Some(VlanId::new(20).unwrap()));
        assert_eq!(treatment.mpls_pushes(), 0);
        assert_eq!(treatment.len(), 3);
    }

    #[test]
    fn mpls_queries_take_innermost_label() {
        let inner = MplsLabel::new(100).unwrap();
        let outer = MplsLabel::new(200).unwrap();
        let treatment = Treatment::builder()
            .push_mpls()
            .set_mpls_label(inner)
            .push_mpls()
            .set_mpls_label(outer)
            .build();

        assert_eq!(treatment.mpls_pushes(), 2);
        assert_eq!(treatment.mpls_label(), Some(inner));
    }

    #[test]
    fn framing_only_is_not_l3() {
        let treatment = Treatment::builder()
            .pop_vlan()
            .output(PortNumber::new(1))
            .build();
        assert!(!treatment.rewrites_mac());
        assert!(treatment.pops_vlan());
    }

    #[test]
    fn selector_lookups() {
        let vlan = VlanId::new(10).unwrap();
        let selector = Selector::builder().match_vlan_id(vlan).build();
        assert_eq!(selector.vlan_id(), Some(vlan));
        assert_eq!(selector.ipv4_dst(), None);
        assert_eq!(selector.criteria().len(), 1);
    }

    #[test]
    fn l2_modification_classification() {
        assert!(Instruction::PopVlan.is_l2_modification());
        assert!(!Instruction::Output(PortNumber::new(1)).is_l2_modification());
        assert!(!Instruction::SetQueue(2).is_l2_modification());
    }
}
