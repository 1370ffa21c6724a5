//! Objective decomposition
//!
//! Turns a [`NextObjective`] into the group chains the OF-DPA pipeline
//! requires:
//!
//! - SIMPLE, framing only: `L2 interface`
//! - SIMPLE, MAC rewrite: `L3 unicast -> L2 interface`
//! - BROADCAST: `L2 flood | L3 multicast -> L2 interface` per bucket
//! - HASHED, no label: `L3 ECMP -> L3 unicast -> L2 interface` per bucket
//! - HASHED, one label: `L3 ECMP -> MPLS L3 VPN -> MPLS interface -> L2 interface` per bucket
//!
//! Decomposition only plans. Nothing is sent to the device here; the
//! result lists the leaves to submit immediately and every parent together
//! with the children it has to wait for.

use crate::error::DecomposeError;
use crate::objective::{NextObjective, NextType};
use pipeliner_chain::{Chain, ChainHandle, CodecError};
use pipeliner_group::{
    Allocation, AppId, Group, GroupBucket, GroupDescriptor, GroupId, GroupIdAllocator, GroupKey,
    GroupType, Instruction, MacAddress, PortNumber, Selector, Treatment, VlanId,
};
use tracing::debug;

/// A group created only after its children are confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedParent {
    /// Group to create
    pub descriptor: GroupDescriptor,
    /// Distinct keys it waits on
    pub children: Vec<GroupKey>,
}

/// Full plan for one objective
#[derive(Debug, Clone)]
pub struct Decomposition {
    /// Root-first chains, all sharing the root
    pub chains: Vec<Chain>,
    /// Distinct leaf groups, submitted immediately
    pub leaves: Vec<GroupDescriptor>,
    /// Every non-leaf group
    pub parents: Vec<PlannedParent>,
}

impl Decomposition {
    /// Key of the shared root
    #[must_use]
    pub fn root(&self) -> Option<GroupKey> {
        self.chains.first().map(Chain::root)
    }

    /// Handle to persist once the root is confirmed
    ///
    /// # Errors
    /// Returns `CodecError` if the chains are empty or disagree on the root
    pub fn handle(&self) -> Result<ChainHandle, CodecError> {
        ChainHandle::new(self.chains.clone())
    }
}

/// Plan for buckets added to an existing root
#[derive(Debug, Clone)]
pub struct BucketAddition {
    /// New chains, starting at the existing root
    pub chains: Vec<Chain>,
    /// Distinct leaves to submit immediately
    pub leaves: Vec<GroupDescriptor>,
    /// Intermediate groups of the new chains
    pub parents: Vec<PlannedParent>,
    /// Root descriptor carrying only the new buckets; fired as a bucket add
    pub root_edit: PlannedParent,
}

/// Groups below the root for one bucket
struct Segment {
    /// Top first
    keys: Vec<GroupKey>,
    top: Allocation,
    leaf: GroupDescriptor,
    parents: Vec<PlannedParent>,
}

/// Segments hung under one root, duplicates collapsed
struct Linked {
    chains: Vec<Chain>,
    leaves: Vec<GroupDescriptor>,
    parents: Vec<PlannedParent>,
    /// One pointer bucket per distinct top group
    buckets: Vec<GroupBucket>,
    children: Vec<GroupKey>,
}

/// Header rewrites relevant to an L2/L3 chain
#[derive(Default)]
struct Framing {
    eth_src: Option<MacAddress>,
    eth_dst: Option<MacAddress>,
    vlan: Option<VlanId>,
    pop_vlan: bool,
    output: Option<PortNumber>,
}

impl Framing {
    fn read(treatment: &Treatment) -> Self {
        let mut framing = Self::default();
        for instruction in treatment.instructions() {
            match instruction {
                Instruction::SetEthSrc(mac) => framing.eth_src = Some(*mac),
                Instruction::SetEthDst(mac) => framing.eth_dst = Some(*mac),
                Instruction::SetVlanId(vlan) => framing.vlan = Some(*vlan),
                Instruction::PopVlan => framing.pop_vlan = true,
                Instruction::Output(port) => framing.output = Some(*port),
                // label handling is read separately by the mpls segment
                other if other.is_l2_modification() => {}
                other => debug!(?other, "instruction not handled in group chains"),
            }
        }
        framing
    }
}

/// Plans group chains for one device
#[derive(Debug, Clone)]
pub struct ObjectiveDecomposer {
    allocator: GroupIdAllocator,
}

impl ObjectiveDecomposer {
    /// Create decomposer
    #[inline]
    #[must_use]
    pub fn new(allocator: GroupIdAllocator) -> Self {
        Self { allocator }
    }

    /// Plan every group of `objective`
    ///
    /// # Errors
    /// Returns `DecomposeError` when the objective has no chain shape here
    pub fn decompose(&self, objective: &NextObjective) -> Result<Decomposition, DecomposeError> {
        match objective.kind() {
            NextType::Simple => self.simple(objective),
            NextType::Broadcast => self.broadcast(objective),
            NextType::Hashed => self.hashed(objective),
            kind @ (NextType::Failover | NextType::Multicast) => {
                Err(DecomposeError::UnsupportedType(kind))
            }
        }
    }

    /// Plan the buckets `treatments` of `objective` under the existing root `root`
    ///
    /// `treatments` is usually the objective's own list, minus buckets
    /// the chain already has.
    ///
    /// # Errors
    /// Returns `DecomposeError` for objectives other than HASHED and
    /// BROADCAST, an empty bucket list, or a bucket without a chain shape
    pub fn decompose_bucket(
        &self,
        objective: &NextObjective,
        treatments: &[Treatment],
        root: &Group,
    ) -> Result<BucketAddition, DecomposeError> {
        let kind = objective.kind();
        let segments = match kind {
            NextType::Hashed => self.hashed_segments(treatments, objective)?,
            NextType::Broadcast => {
                let assigned = objective
                    .meta()
                    .and_then(Selector::vlan_id)
                    .ok_or(DecomposeError::MissingVlan)?;
                self.broadcast_segments(treatments, assigned, objective.app_id())?
            }
            other => return Err(DecomposeError::UnsupportedType(other)),
        };
        if segments.is_empty() {
            return Err(DecomposeError::NoBuckets(kind));
        }

        let linked = link(root.key, segments);
        let root_alloc = Allocation {
            key: root.key,
            id: root.id,
        };
        debug!(root = %root.id, buckets = linked.buckets.len(), "bucket addition planned");
        Ok(BucketAddition {
            chains: linked.chains,
            leaves: linked.leaves,
            parents: linked.parents,
            root_edit: PlannedParent {
                descriptor: self.descriptor(
                    root.group_type,
                    linked.buckets,
                    root_alloc,
                    objective.app_id(),
                ),
                children: linked.children,
            },
        })
    }

    fn simple(&self, objective: &NextObjective) -> Result<Decomposition, DecomposeError> {
        let [treatment] = objective.treatments() else {
            return Err(DecomposeError::SimpleBucketCount(objective.treatments().len()));
        };
        let meta = objective.meta();
        let app = objective.app_id();

        if treatment.rewrites_mac() {
            let segment = self.l2_l3_segment(0, treatment, meta, false, app)?;
            let chain = segment
                .keys
                .iter()
                .skip(1)
                .fold(Chain::new(segment.top.key), |chain, key| chain.then(*key));
            return Ok(Decomposition {
                chains: vec![chain],
                leaves: vec![segment.leaf],
                parents: segment.parents,
            });
        }

        let vlan = treatment
            .vlan_id()
            .or_else(|| meta.and_then(Selector::vlan_id))
            .ok_or(DecomposeError::MissingVlan)?;
        let segment = self.l2_segment(0, treatment, vlan, app)?;
        Ok(Decomposition {
            chains: vec![Chain::new(segment.top.key)],
            leaves: vec![segment.leaf],
            parents: Vec::new(),
        })
    }

    fn broadcast(&self, objective: &NextObjective) -> Result<Decomposition, DecomposeError> {
        let meta = objective.meta();
        let app = objective.app_id();
        let assigned = meta
            .and_then(Selector::vlan_id)
            .ok_or(DecomposeError::MissingVlan)?;
        if objective.treatments().is_empty() {
            return Err(DecomposeError::NoBuckets(NextType::Broadcast));
        }
        let destination = meta.and_then(Selector::ipv4_dst);
        if let Some(dst) = destination.filter(|dst| !dst.is_multicast()) {
            return Err(DecomposeError::NotMulticast(dst));
        }

        let segments = self.broadcast_segments(objective.treatments(), assigned, app)?;

        let root = if destination.is_some() {
            self.allocator.l3_multicast(assigned)
        } else {
            self.allocator.l2_flood(assigned)
        };
        debug!(root = %root.id, kind = %root.id.kind(), buckets = segments.len(), "broadcast chain planned");
        Ok(self.assemble(root, GroupType::All, segments, app))
    }

    fn hashed(&self, objective: &NextObjective) -> Result<Decomposition, DecomposeError> {
        if objective.treatments().is_empty() {
            return Err(DecomposeError::NoBuckets(NextType::Hashed));
        }
        let segments = self.hashed_segments(objective.treatments(), objective)?;

        let root = self.allocator.l3_ecmp();
        debug!(root = %root.id, buckets = segments.len(), "ecmp chain planned");
        Ok(self.assemble(root, GroupType::Select, segments, objective.app_id()))
    }

    fn hashed_segments(
        &self,
        treatments: &[Treatment],
        objective: &NextObjective,
    ) -> Result<Vec<Segment>, DecomposeError> {
        treatments
            .iter()
            .enumerate()
            .map(|(bucket, treatment)| {
                self.hashed_segment(bucket, treatment, objective.meta(), objective.app_id())
            })
            .collect()
    }

    /// One L2 interface per bucket, tagged with the bucket's own VLAN or `assigned`
    fn broadcast_segments(
        &self,
        treatments: &[Treatment],
        assigned: VlanId,
        app: &AppId,
    ) -> Result<Vec<Segment>, DecomposeError> {
        treatments
            .iter()
            .enumerate()
            .map(|(bucket, treatment)| {
                let vlan = treatment.vlan_id().unwrap_or(assigned);
                self.l2_segment(bucket, treatment, vlan, app)
            })
            .collect()
    }

    /// Bucket chain of a hashed objective, shared by full decomposition and bucket adds
    fn hashed_segment(
        &self,
        bucket: usize,
        treatment: &Treatment,
        meta: Option<&Selector>,
        app: &AppId,
    ) -> Result<Segment, DecomposeError> {
        match treatment.mpls_pushes() {
            0 => self.l2_l3_segment(bucket, treatment, meta, false, app),
            1 => {
                let label = treatment
                    .mpls_label()
                    .ok_or(DecomposeError::MissingLabel { bucket })?;
                let mut segment = self.l2_l3_segment(bucket, treatment, meta, true, app)?;

                let vpn = self.allocator.mpls_l3vpn();
                let push = Treatment::builder()
                    .push_mpls()
                    .set_mpls_label(label)
                    .set_mpls_bos(true)
                    .copy_ttl_out()
                    .group(segment.top.id)
                    .build();
                segment.parents.push(PlannedParent {
                    descriptor: self.descriptor(
                        GroupType::Indirect,
                        vec![GroupBucket::new(push)],
                        vpn,
                        app,
                    ),
                    children: vec![segment.top.key],
                });
                segment.keys.insert(0, vpn.key);
                segment.top = vpn;
                Ok(segment)
            }
            labels => Err(DecomposeError::TooManyLabels { bucket, labels }),
        }
    }

    /// `L3 unicast -> L2 interface`, or `MPLS interface -> L2 interface` when `mpls`
    fn l2_l3_segment(
        &self,
        bucket: usize,
        treatment: &Treatment,
        meta: Option<&Selector>,
        mpls: bool,
        app: &AppId,
    ) -> Result<Segment, DecomposeError> {
        let framing = Framing::read(treatment);
        let vlan = framing
            .vlan
            .or_else(|| meta.and_then(Selector::vlan_id))
            .ok_or(DecomposeError::MissingVlan)?;
        let port = framing
            .output
            .ok_or(DecomposeError::MissingOutput { bucket })?;

        // untagged egress unless the treatment sets a vlan
        let mut inner = Treatment::builder();
        if framing.pop_vlan || framing.vlan.is_none() {
            inner = inner.pop_vlan();
        }
        let leaf_alloc = self.allocator.l2_interface(vlan, port);
        let leaf = self.descriptor(
            GroupType::Indirect,
            vec![GroupBucket::new(inner.output(port).build())],
            leaf_alloc,
            app,
        );

        let mut outer = Treatment::builder();
        if let Some(mac) = framing.eth_src {
            outer = outer.set_eth_src(mac);
        }
        if let Some(mac) = framing.eth_dst {
            outer = outer.set_eth_dst(mac);
        }
        let outer = outer.set_vlan_id(vlan).group(leaf_alloc.id).build();
        let outer_alloc = if mpls {
            self.allocator.mpls_interface()
        } else {
            self.allocator.l3_unicast()
        };
        debug!(
            leaf = %leaf_alloc.id,
            next_hop = %outer_alloc.id,
            %vlan,
            %port,
            "l2/l3 chain planned"
        );

        Ok(Segment {
            keys: vec![outer_alloc.key, leaf_alloc.key],
            top: outer_alloc,
            leaf,
            parents: vec![PlannedParent {
                descriptor: self.descriptor(
                    GroupType::Indirect,
                    vec![GroupBucket::new(outer)],
                    outer_alloc,
                    app,
                ),
                children: vec![leaf_alloc.key],
            }],
        })
    }

    /// Lone L2 interface; keeps only VLAN pop and output
    fn l2_segment(
        &self,
        bucket: usize,
        treatment: &Treatment,
        vlan: VlanId,
        app: &AppId,
    ) -> Result<Segment, DecomposeError> {
        let mut kept = Treatment::builder();
        let mut port = None;
        for instruction in treatment.instructions() {
            match instruction {
                Instruction::PopVlan => kept = kept.pop_vlan(),
                Instruction::Output(p) => {
                    port = Some(*p);
                    kept = kept.output(*p);
                }
                Instruction::SetVlanId(_) => {}
                other if other.is_l2_modification() => {
                    debug!(?other, bucket, "header rewrite dropped from l2 interface bucket");
                }
                other => debug!(?other, bucket, "instruction not permitted in l2 interface bucket"),
            }
        }
        let port = port.ok_or(DecomposeError::MissingOutput { bucket })?;
        let alloc = self.allocator.l2_interface(vlan, port);
        Ok(Segment {
            keys: vec![alloc.key],
            top: alloc,
            leaf: self.descriptor(
                GroupType::Indirect,
                vec![GroupBucket::new(kept.build())],
                alloc,
                app,
            ),
            parents: Vec::new(),
        })
    }

    /// Hang every segment under one root, collapsing duplicates
    fn assemble(
        &self,
        root: Allocation,
        group_type: GroupType,
        segments: Vec<Segment>,
        app: &AppId,
    ) -> Decomposition {
        let Linked {
            chains,
            leaves,
            mut parents,
            buckets,
            children,
        } = link(root.key, segments);

        parents.push(PlannedParent {
            descriptor: self.descriptor(group_type, buckets, root, app),
            children,
        });
        Decomposition {
            chains,
            leaves,
            parents,
        }
    }

    fn descriptor(
        &self,
        group_type: GroupType,
        buckets: Vec<GroupBucket>,
        alloc: Allocation,
        app: &AppId,
    ) -> GroupDescriptor {
        GroupDescriptor::new(
            self.allocator.device_id().clone(),
            group_type,
            buckets,
            alloc.key,
            Some(alloc.id),
            app.clone(),
        )
    }
}

fn link(root: GroupKey, segments: Vec<Segment>) -> Linked {
    let mut linked = Linked {
        chains: Vec::new(),
        leaves: Vec::new(),
        parents: Vec::new(),
        buckets: Vec::new(),
        children: Vec::new(),
    };
    for segment in segments {
        let chain = segment
            .keys
            .iter()
            .fold(Chain::new(root), |chain, key| chain.then(*key));
        if !linked.chains.contains(&chain) {
            linked.chains.push(chain);
        }
        if !linked.children.contains(&segment.top.key) {
            linked.children.push(segment.top.key);
            linked.buckets.push(pointer_bucket(segment.top.id));
        }
        if !linked.leaves.iter().any(|leaf| leaf.key == segment.leaf.key) {
            linked.leaves.push(segment.leaf);
        }
        linked.parents.extend(segment.parents);
    }
    linked
}

/// Root bucket continuing in group `target`
pub(crate) fn pointer_bucket(target: GroupId) -> GroupBucket {
    GroupBucket::new(Treatment::builder().group(target).build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeliner_group::{AtomicSequence, DeviceId, GroupIdKind, IpPrefix, MplsLabel, NextId};
    use std::sync::Arc;

    fn decomposer() -> ObjectiveDecomposer {
        ObjectiveDecomposer::new(GroupIdAllocator::new(
            DeviceId::new("of:1"),
            Arc::new(AtomicSequence::new()),
        ))
    }

    fn vlan(v: u16) -> VlanId {
        VlanId::new(v).unwrap()
    }

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0, 0, 0, 0, 0, last])
    }

    fn meta(v: u16) -> Selector {
        Selector::builder().match_vlan_id(vlan(v)).build()
    }

    fn output(port: u64) -> Treatment {
        Treatment::builder().output(PortNumber::new(port)).build()
    }

    fn routed(port: u64) -> Treatment {
        Treatment::builder()
            .set_eth_src(mac(1))
            .set_eth_dst(mac(port as u8))
            .output(PortNumber::new(port))
            .build()
    }

    #[test]
    fn simple_framing_is_single_leaf() {
        let objective = NextObjective::builder(NextId::new(1), NextType::Simple)
            .with_treatment(output(3))
            .with_meta(meta(10))
            .add();
        let plan = decomposer().decompose(&objective).unwrap();

        assert_eq!(plan.chains.len(), 1);
        assert_eq!(plan.chains[0].depth(), 1);
        assert!(plan.parents.is_empty());
        let expected = GroupKey::l2_interface(&DeviceId::new("of:1"), vlan(10), PortNumber::new(3));
        assert_eq!(plan.root(), Some(expected));
        assert_eq!(plan.leaves[0].group_id.unwrap().raw(), 0x000a_0003);
    }

    #[test]
    fn simple_rewrite_is_two_level() {
        let objective = NextObjective::builder(NextId::new(1), NextType::Simple)
            .with_treatment(
                Treatment::builder()
                    .set_eth_dst(mac(9))
                    .output(PortNumber::new(3))
                    .build(),
            )
            .with_meta(meta(10))
            .add();
        let plan = decomposer().decompose(&objective).unwrap();

        let chain = &plan.chains[0];
        assert_eq!(chain.depth(), 2);
        assert_ne!(chain.root(), chain.leaf());
        assert_eq!(plan.leaves.len(), 1);
        assert_eq!(plan.leaves[0].key, chain.leaf());

        let parent = &plan.parents[0];
        assert_eq!(parent.descriptor.key, chain.root());
        assert_eq!(parent.children, vec![chain.leaf()]);
        assert_eq!(
            parent.descriptor.group_id.unwrap().kind(),
            GroupIdKind::L3Unicast
        );
        let outer = &parent.descriptor.buckets[0].treatment;
        assert_eq!(outer.vlan_id(), Some(vlan(10)));
        assert_eq!(outer.group(), plan.leaves[0].group_id);

        // untagged egress: leaf pops the vlan
        assert!(plan.leaves[0].buckets[0].treatment.pops_vlan());
    }

    #[test]
    fn simple_without_vlan_is_rejected() {
        let objective = NextObjective::builder(NextId::new(1), NextType::Simple)
            .with_treatment(output(3))
            .add();
        assert_eq!(
            decomposer().decompose(&objective).unwrap_err(),
            DecomposeError::MissingVlan
        );
    }

    #[test]
    fn simple_needs_exactly_one_treatment() {
        let objective = NextObjective::builder(NextId::new(1), NextType::Simple)
            .with_treatments([output(1), output(2)])
            .with_meta(meta(10))
            .add();
        assert_eq!(
            decomposer().decompose(&objective).unwrap_err(),
            DecomposeError::SimpleBucketCount(2)
        );
    }

    #[test]
    fn broadcast_shares_flood_root() {
        let objective = NextObjective::builder(NextId::new(2), NextType::Broadcast)
            .with_treatments([output(1), output(2), output(3)])
            .with_meta(meta(20))
            .add();
        let plan = decomposer().decompose(&objective).unwrap();

        assert_eq!(plan.chains.len(), 3);
        let root = plan.root().unwrap();
        assert!(plan.chains.iter().all(|c| c.root() == root && c.depth() == 2));
        assert_eq!(plan.leaves.len(), 3);

        let root_plan = plan.parents.last().unwrap();
        assert_eq!(root_plan.descriptor.group_type, GroupType::All);
        assert_eq!(root_plan.children.len(), 3);
        assert_eq!(
            root_plan.descriptor.group_id.unwrap().kind(),
            GroupIdKind::L2Flood
        );
    }

    #[test]
    fn broadcast_multicast_destination() {
        let selector = Selector::builder()
            .match_vlan_id(vlan(20))
            .match_ipv4_dst("224.0.0.5/32".parse::<IpPrefix>().unwrap())
            .build();
        let objective = NextObjective::builder(NextId::new(2), NextType::Broadcast)
            .with_treatments([output(1), output(2)])
            .with_meta(selector)
            .add();
        let plan = decomposer().decompose(&objective).unwrap();
        let root_plan = plan.parents.last().unwrap();
        assert_eq!(
            root_plan.descriptor.group_id.unwrap().kind(),
            GroupIdKind::L3Multicast
        );

        let unicast = Selector::builder()
            .match_vlan_id(vlan(20))
            .match_ipv4_dst("10.0.0.1/32".parse::<IpPrefix>().unwrap())
            .build();
        let objective = NextObjective::builder(NextId::new(3), NextType::Broadcast)
            .with_treatment(output(1))
            .with_meta(unicast)
            .add();
        assert!(matches!(
            decomposer().decompose(&objective),
            Err(DecomposeError::NotMulticast(_))
        ));
    }

    #[test]
    fn broadcast_drops_foreign_actions_and_collapses_duplicates() {
        let noisy = Treatment::builder()
            .set_eth_dst(mac(5))
            .pop_vlan()
            .output(PortNumber::new(4))
            .build();
        let objective = NextObjective::builder(NextId::new(2), NextType::Broadcast)
            .with_treatments([noisy.clone(), noisy])
            .with_meta(meta(30))
            .add();
        let plan = decomposer().decompose(&objective).unwrap();

        assert_eq!(plan.leaves.len(), 1);
        assert_eq!(plan.chains.len(), 1);
        assert_eq!(plan.parents.last().unwrap().children.len(), 1);
        let kept = &plan.leaves[0].buckets[0].treatment;
        assert!(!kept.rewrites_mac());
        assert!(kept.pops_vlan());
    }

    #[test]
    fn broadcast_bucket_without_output() {
        let objective = NextObjective::builder(NextId::new(2), NextType::Broadcast)
            .with_treatments([output(1), Treatment::builder().pop_vlan().build()])
            .with_meta(meta(30))
            .add();
        assert_eq!(
            decomposer().decompose(&objective).unwrap_err(),
            DecomposeError::MissingOutput { bucket: 1 }
        );
    }

    #[test]
    fn hashed_chains_by_label_count() {
        let labelled = Treatment::builder()
            .set_eth_dst(mac(7))
            .push_mpls()
            .set_mpls_label(MplsLabel::new(100).unwrap())
            .output(PortNumber::new(7))
            .build();
        let objective = NextObjective::builder(NextId::new(4), NextType::Hashed)
            .with_treatments([routed(6), labelled])
            .with_meta(meta(40))
            .add();
        let plan = decomposer().decompose(&objective).unwrap();

        assert_eq!(plan.chains.len(), 2);
        assert_eq!(plan.chains[0].depth(), 3);
        assert_eq!(plan.chains[1].depth(), 4);

        let root_plan = plan.parents.last().unwrap();
        assert_eq!(root_plan.descriptor.group_type, GroupType::Select);
        assert_eq!(
            root_plan.descriptor.group_id.unwrap().kind(),
            GroupIdKind::L3Ecmp
        );
        let kinds: Vec<_> = plan
            .parents
            .iter()
            .map(|p| p.descriptor.group_id.unwrap().kind())
            .collect();
        assert!(kinds.contains(&GroupIdKind::MplsInterface));
        assert!(kinds.contains(&GroupIdKind::MplsL3Vpn));
    }

    #[test]
    fn hashed_label_edge_cases() {
        let stacked = Treatment::builder()
            .push_mpls()
            .set_mpls_label(MplsLabel::new(1).unwrap())
            .push_mpls()
            .set_mpls_label(MplsLabel::new(2).unwrap())
            .output(PortNumber::new(1))
            .build();
        let objective = NextObjective::builder(NextId::new(5), NextType::Hashed)
            .with_treatment(stacked)
            .with_meta(meta(40))
            .add();
        let err = decomposer().decompose(&objective).unwrap_err();
        assert_eq!(err, DecomposeError::TooManyLabels { bucket: 0, labels: 2 });

        let unlabelled = Treatment::builder()
            .push_mpls()
            .output(PortNumber::new(1))
            .build();
        let objective = NextObjective::builder(NextId::new(6), NextType::Hashed)
            .with_treatment(unlabelled)
            .with_meta(meta(40))
            .add();
        assert_eq!(
            decomposer().decompose(&objective).unwrap_err(),
            DecomposeError::MissingLabel { bucket: 0 }
        );

        let empty = NextObjective::builder(NextId::new(7), NextType::Hashed).add();
        assert_eq!(
            decomposer().decompose(&empty).unwrap_err(),
            DecomposeError::NoBuckets(NextType::Hashed)
        );
    }

    #[test]
    fn failover_and_multicast_are_unsupported() {
        for kind in [NextType::Failover, NextType::Multicast] {
            let objective = NextObjective::builder(NextId::new(8), kind)
                .with_treatment(output(1))
                .add();
            assert_eq!(
                decomposer().decompose(&objective).unwrap_err(),
                DecomposeError::UnsupportedType(kind)
            );
        }
    }

    #[test]
    fn bucket_addition_hangs_under_existing_root() {
        let decomposer = decomposer();
        let objective = NextObjective::builder(NextId::new(4), NextType::Hashed)
            .with_treatment(routed(6))
            .with_meta(meta(40))
            .add();
        let plan = decomposer.decompose(&objective).unwrap();
        let root_desc = &plan.parents.last().unwrap().descriptor;
        let root = Group::from_descriptor(root_desc, root_desc.group_id.unwrap());

        let edit = NextObjective::builder(NextId::new(4), NextType::Hashed)
            .with_treatments([routed(8), routed(9)])
            .with_meta(meta(40))
            .add_to_existing();
        let addition = decomposer
            .decompose_bucket(&edit, edit.treatments(), &root)
            .unwrap();

        assert_eq!(addition.chains.len(), 2);
        assert!(addition.chains.iter().all(|c| c.root() == root.key && c.depth() == 3));
        assert_eq!(addition.root_edit.descriptor.key, root.key);
        assert_eq!(addition.root_edit.descriptor.group_type, GroupType::Select);
        assert_eq!(addition.root_edit.descriptor.buckets.len(), 2);
        assert_eq!(
            addition.root_edit.children,
            vec![addition.chains[0].keys()[1], addition.chains[1].keys()[1]]
        );
        assert_eq!(addition.leaves.len(), 2);
        assert_eq!(addition.leaves[1].key, addition.chains[1].leaf());
        assert_eq!(addition.parents.len(), 2);

        // only the listed buckets are planned
        let partial = decomposer
            .decompose_bucket(&edit, &edit.treatments()[1..], &root)
            .unwrap();
        assert_eq!(partial.chains.len(), 1);
        assert_eq!(
            partial.leaves[0].buckets[0].treatment.output_port(),
            Some(PortNumber::new(9))
        );
        assert_eq!(
            decomposer.decompose_bucket(&edit, &[], &root).unwrap_err(),
            DecomposeError::NoBuckets(NextType::Hashed)
        );
    }

    #[test]
    fn broadcast_bucket_addition_points_root_at_leaves() {
        let decomposer = decomposer();
        let objective = NextObjective::builder(NextId::new(2), NextType::Broadcast)
            .with_treatment(output(1))
            .with_meta(meta(20))
            .add();
        let plan = decomposer.decompose(&objective).unwrap();
        let root_desc = &plan.parents.last().unwrap().descriptor;
        let root = Group::from_descriptor(root_desc, root_desc.group_id.unwrap());

        let edit = NextObjective::builder(NextId::new(2), NextType::Broadcast)
            .with_treatment(output(4))
            .with_meta(meta(20))
            .add_to_existing();
        let addition = decomposer
            .decompose_bucket(&edit, edit.treatments(), &root)
            .unwrap();

        let leaf = GroupKey::l2_interface(&DeviceId::new("of:1"), vlan(20), PortNumber::new(4));
        assert_eq!(addition.chains, vec![Chain::new(root.key).then(leaf)]);
        assert!(addition.parents.is_empty());
        assert_eq!(addition.root_edit.children, vec![leaf]);
        assert_eq!(addition.root_edit.descriptor.group_type, GroupType::All);
        assert_eq!(
            addition.root_edit.descriptor.buckets[0].treatment.group(),
            addition.leaves[0].group_id
        );

        let unscoped = NextObjective::builder(NextId::new(2), NextType::Broadcast)
            .with_treatment(output(4))
            .add_to_existing();
        assert_eq!(
            decomposer
                .decompose_bucket(&unscoped, unscoped.treatments(), &root)
                .unwrap_err(),
            DecomposeError::MissingVlan
        );

        let simple = NextObjective::builder(NextId::new(2), NextType::Simple)
            .with_treatment(output(4))
            .with_meta(meta(20))
            .add_to_existing();
        assert_eq!(
            decomposer
                .decompose_bucket(&simple, simple.treatments(), &root)
                .unwrap_err(),
            DecomposeError::UnsupportedType(NextType::Simple)
        );
    }

    proptest::proptest! {
        #[test]
        fn hashed_chains_share_root_and_never_share_leaves(
            ports in proptest::collection::btree_set(1u64..200, 1..8)
        ) {
            let objective = NextObjective::builder(NextId::new(9), NextType::Hashed)
                .with_treatments(ports.iter().map(|p| routed(*p)))
                .with_meta(meta(20))
                .add();
            let plan = decomposer().decompose(&objective).unwrap();

            proptest::prop_assert_eq!(plan.chains.len(), ports.len());
            proptest::prop_assert_eq!(plan.leaves.len(), ports.len());
            let root = plan.root().unwrap();
            let mut leaves = std::collections::HashSet::new();
            for chain in &plan.chains {
                proptest::prop_assert_eq!(chain.root(), root);
                proptest::prop_assert_eq!(chain.depth(), 3);
                proptest::prop_assert!(leaves.insert(chain.leaf()));
            }
        }
    }
}
