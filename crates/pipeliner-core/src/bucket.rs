//! Bucket edits and verification on hashed and broadcast chains
//!
//! Stored chains are told apart by their egress: the output port of the
//! leaf and the MPLS label pushed by the group below the root. Every edit
//! rewrites the stored handle first and then waits for the device to
//! report the root updated.

use crate::decompose::{pointer_bucket, BucketAddition};
use crate::error::{DecomposeError, PipelinerError};
use crate::objective::{NextObjective, NextType};
use crate::pipeliner::{Inner, PendingKind, PendingNext};
use pipeliner_chain::{Chain, ChainHandle};
use pipeliner_group::{
    Group, GroupBucket, GroupDescriptor, GroupId, MplsLabel, NextId, PortNumber, Treatment,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Where a chain or a requested bucket sends traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Egress {
    port: PortNumber,
    label: Option<MplsLabel>,
}

impl Egress {
    fn of(treatment: &Treatment) -> Option<Self> {
        Some(Self {
            port: treatment.output_port()?,
            label: treatment.mpls_label(),
        })
    }

    /// A bucket repeats a chain on the same port, unless it asks for a different label
    fn duplicates(&self, existing: &Self) -> bool {
        self.port == existing.port && (self.label.is_none() || self.label == existing.label)
    }
}

fn check_editable(objective: &NextObjective) -> Result<(), PipelinerError> {
    match objective.kind() {
        NextType::Hashed | NextType::Broadcast => {}
        kind => return Err(PipelinerError::UnsupportedEdit(kind)),
    }
    if objective.treatments().is_empty() {
        return Err(DecomposeError::NoBuckets(objective.kind()).into());
    }
    Ok(())
}

impl Inner {
    /// Install chains for the requested buckets the handle lacks and hook them under the root
    pub(crate) fn add_bucket(
        &self,
        objective: &NextObjective,
        handle: &ChainHandle,
    ) -> Result<(), PipelinerError> {
        let id = objective.id();
        check_editable(objective)?;
        let root = self.root_of(handle)?;

        let existing: Vec<Egress> = self.egresses(id, handle).into_iter().flatten().collect();
        let fresh: Vec<Treatment> = objective
            .treatments()
            .iter()
            .filter(|treatment| match Egress::of(treatment) {
                Some(wanted) => !existing.iter().any(|chain| wanted.duplicates(chain)),
                None => true,
            })
            .cloned()
            .collect();
        if fresh.is_empty() {
            info!(%id, root = %root.key, "requested buckets already present");
            objective.notify_success();
            return Ok(());
        }
        if fresh.len() < objective.treatments().len() {
            debug!(
                %id,
                skipped = objective.treatments().len() - fresh.len(),
                "duplicate buckets skipped"
            );
        }

        let addition = self.decomposer.decompose_bucket(objective, &fresh, &root)?;
        self.install_buckets(objective.clone(), addition);
        Ok(())
    }

    /// Submit the new chains; the root edit fires once their tops are confirmed
    fn install_buckets(&self, objective: NextObjective, addition: BucketAddition) {
        let id = objective.id();
        let root = addition.root_edit.descriptor.key;
        let ticket = self.next_ticket();
        let pending = Arc::new(PendingNext::new(
            ticket,
            objective,
            PendingKind::AddBucket {
                chains: addition.chains,
            },
        ));
        self.pending.insert(ticket, Arc::clone(&pending));
        for parent in addition.parents {
            self.register(parent, &pending, false);
        }
        self.register(addition.root_edit, &pending, true);

        debug!(%id, %root, leaves = addition.leaves.len(), "adding bucket chains");
        for leaf in addition.leaves {
            self.groups.add_group(leaf);
        }
    }

    /// The new chains are confirmed up to the groups below the root
    pub(crate) fn finish_bucket_add(&self, pending: &Arc<PendingNext>, root: &GroupDescriptor) {
        let PendingKind::AddBucket { chains } = &pending.kind else {
            return;
        };
        if !pending.settle() {
            return;
        }
        self.pending.invalidate(&pending.ticket);

        let id = pending.objective.id();
        if let Err(e) = self.append_chains(id, chains) {
            error!(%id, error = %e, "bucket chains installed but handle not updated");
            pending.objective.notify_error(e.objective_error());
            return;
        }
        debug!(%id, root = %root.key, buckets = root.buckets.len(), "adding buckets to root");
        self.await_update(
            pending.objective.clone(),
            root.key,
            root.buckets.clone(),
            Vec::new(),
        );
        self.groups.add_buckets_to_group(
            &self.device_id,
            root.key,
            root.buckets.clone(),
            &root.app_id,
        );
    }

    fn append_chains(&self, id: NextId, chains: &[Chain]) -> Result<(), PipelinerError> {
        let handle = self.store.get(id)?.ok_or(PipelinerError::UnknownNext(id))?;
        let grown = chains
            .iter()
            .try_fold(handle, |handle, chain| handle.with_chain(chain.clone()))?;
        self.store.put(id, &grown)?;
        Ok(())
    }

    /// Unhook every chain whose egress matches a requested bucket
    ///
    /// The chains' own groups stay on the device.
    pub(crate) fn remove_bucket(
        &self,
        objective: &NextObjective,
        handle: &ChainHandle,
    ) -> Result<(), PipelinerError> {
        let id = objective.id();
        check_editable(objective)?;

        let egresses = self.egresses(id, handle);
        let mut doomed: Vec<usize> = Vec::new();
        for treatment in objective.treatments() {
            let Some(wanted) = Egress::of(treatment) else {
                warn!(%id, "bucket without output port cannot be matched");
                continue;
            };
            for (index, found) in egresses.iter().enumerate() {
                if *found == Some(wanted) && !doomed.contains(&index) {
                    doomed.push(index);
                }
            }
        }
        if doomed.is_empty() {
            return Err(PipelinerError::NoMatchingChain(id));
        }
        self.unhook(objective, handle, &doomed)
    }

    /// Drop the chains at `doomed` from the handle and their buckets from the root
    fn unhook(
        &self,
        objective: &NextObjective,
        handle: &ChainHandle,
        doomed: &[usize],
    ) -> Result<(), PipelinerError> {
        let id = objective.id();
        let remaining = handle
            .without_chains(doomed)
            .ok_or(PipelinerError::LastBucket(id))?;
        let root = self.root_of(handle)?;
        let buckets = doomed
            .iter()
            .map(|index| {
                let chain = &handle.chains()[*index];
                let pointed = chain
                    .below_root()
                    .ok_or(PipelinerError::GroupMissing(chain.root()))?;
                self.groups
                    .get_group(&self.device_id, pointed)
                    .map(|group| pointer_bucket(group.id))
                    .ok_or(PipelinerError::GroupMissing(pointed))
            })
            .collect::<Result<Vec<GroupBucket>, _>>()?;

        self.store.put(id, &remaining)?;
        debug!(%id, root = %root.key, buckets = buckets.len(), "removing buckets from root");
        self.await_update(objective.clone(), root.key, Vec::new(), buckets.clone());
        self.groups
            .remove_buckets_from_group(&self.device_id, root.key, buckets, objective.app_id());
        Ok(())
    }

    /// Bring the stored chains and the root group back in line with `objective`
    ///
    /// Missing buckets are created, duplicate and unrequested chains are
    /// unhooked. When the handle already matches, the root group on the
    /// device is compared with the handle and corrected.
    pub(crate) fn verify(
        &self,
        objective: &NextObjective,
        handle: &ChainHandle,
    ) -> Result<(), PipelinerError> {
        let id = objective.id();
        check_editable(objective)?;
        let root = self.root_of(handle)?;

        let egresses = self.egresses(id, handle);
        let mut requested = vec![false; egresses.len()];
        let mut create: Vec<Treatment> = Vec::new();
        let mut doomed: Vec<usize> = Vec::new();
        for (bucket, treatment) in objective.treatments().iter().enumerate() {
            let wanted = Egress::of(treatment).ok_or(DecomposeError::MissingOutput { bucket })?;
            let hits: Vec<usize> = egresses
                .iter()
                .enumerate()
                .filter(|(_, found)| **found == Some(wanted))
                .map(|(index, _)| index)
                .collect();
            match hits.split_first() {
                None => create.push(treatment.clone()),
                Some((_, extra)) => {
                    for index in extra {
                        if !doomed.contains(index) {
                            doomed.push(*index);
                        }
                    }
                }
            }
            for index in hits {
                requested[index] = true;
            }
        }
        // chains whose leaf is gone cannot be matched, so they are left alone
        for (index, found) in egresses.iter().enumerate() {
            if found.is_some() && !requested[index] && !doomed.contains(&index) {
                doomed.push(index);
            }
        }

        if create.is_empty() && doomed.is_empty() {
            return self.verify_root(objective, handle, &root);
        }
        if !doomed.is_empty() && doomed.len() == handle.chain_count() {
            // unhooking would empty the handle; the stale chains go on a later pass
            warn!(%id, stale = doomed.len(), "every stored chain is stale, keeping them for now");
            doomed.clear();
        }
        info!(%id, create = create.len(), remove = doomed.len(), "correcting next objective");

        match (create.is_empty(), doomed.is_empty()) {
            (false, true) => {
                let addition = self.decomposer.decompose_bucket(objective, &create, &root)?;
                self.install_buckets(objective.clone(), addition);
            }
            (true, false) => self.unhook(objective, handle, &doomed)?,
            _ => {
                // the creation owns the callbacks
                let addition = self.decomposer.decompose_bucket(objective, &create, &root)?;
                self.unhook(&objective.without_context(), handle, &doomed)?;
                self.install_buckets(objective.clone(), addition);
            }
        }
        Ok(())
    }

    /// Compare the root's buckets on the device with one pointer bucket per stored chain
    fn verify_root(
        &self,
        objective: &NextObjective,
        handle: &ChainHandle,
        root: &Group,
    ) -> Result<(), PipelinerError> {
        let id = objective.id();
        let expected: Vec<GroupId> = handle
            .chains()
            .iter()
            .filter_map(Chain::below_root)
            .filter_map(|key| self.groups.get_group(&self.device_id, key))
            .map(|group| group.id)
            .collect();
        let present: Vec<GroupId> = root
            .buckets
            .iter()
            .filter_map(|bucket| bucket.treatment.group())
            .collect();

        let mut missing: Vec<GroupBucket> = Vec::new();
        for group in &expected {
            let bucket = pointer_bucket(*group);
            if !present.contains(group) && !missing.contains(&bucket) {
                missing.push(bucket);
            }
        }
        let extra: Vec<GroupBucket> = root
            .buckets
            .iter()
            .filter(|bucket| {
                bucket
                    .treatment
                    .group()
                    .map_or(true, |group| !expected.contains(&group))
            })
            .cloned()
            .collect();

        if missing.is_empty() && extra.is_empty() {
            info!(%id, root = %root.key, "next objective verified");
            objective.notify_success();
            return Ok(());
        }

        warn!(
            %id,
            root = %root.key,
            missing = missing.len(),
            extra = extra.len(),
            "root group out of sync, correcting"
        );
        self.await_update(objective.clone(), root.key, missing.clone(), extra.clone());
        if !missing.is_empty() {
            self.groups
                .add_buckets_to_group(&self.device_id, root.key, missing, objective.app_id());
        }
        if !extra.is_empty() {
            self.groups
                .remove_buckets_from_group(&self.device_id, root.key, extra, objective.app_id());
        }
        Ok(())
    }

    fn root_of(&self, handle: &ChainHandle) -> Result<Group, PipelinerError> {
        let key = handle.root();
        self.groups
            .get_group(&self.device_id, key)
            .ok_or(PipelinerError::GroupMissing(key))
    }

    /// Egress of each stored chain, in handle order; `None` where the leaf is gone
    fn egresses(&self, id: NextId, handle: &ChainHandle) -> Vec<Option<Egress>> {
        handle
            .chains()
            .iter()
            .map(|chain| {
                let egress = self.chain_egress(chain);
                if egress.is_none() {
                    warn!(%id, leaf = %chain.leaf(), "leaf of stored chain not on device");
                }
                egress
            })
            .collect()
    }

    /// Output port of the leaf and label of the group below the root
    fn chain_egress(&self, chain: &Chain) -> Option<Egress> {
        let leaf = self.groups.get_group(&self.device_id, chain.leaf())?;
        let port = leaf.first_output_port()?;
        let label = chain
            .below_root()
            .and_then(|key| self.groups.get_group(&self.device_id, key))
            .and_then(|group| {
                group
                    .buckets
                    .first()
                    .and_then(|bucket| bucket.treatment.mpls_label())
            });
        Some(Egress { port, label })
    }
}
