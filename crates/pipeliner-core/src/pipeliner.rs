//! Completion dispatcher
//!
//! Drives group chains from submission to confirmation:
//! - ADD installs leaves first and creates every parent once all of its
//!   children are confirmed; the root confirmation stores the chain handle
//! - REMOVE tears the whole chain down and deletes the handle once every
//!   group is gone
//! - Bucket edits grow or shrink a hashed or broadcast chain in place and
//!   settle once the device reports the root updated
//! - VERIFY repairs drift between the stored chains, the objective and the
//!   root group on the device
//!
//! Confirmations arrive from two racing sources, group events and the
//! periodic checker. Every completion is settled exactly once, so callers
//! see one callback per objective regardless of duplicates.

use crate::config::PipelinerConfig;
use crate::decompose::{ObjectiveDecomposer, PlannedParent};
use crate::diagnostics::PipelinerStats;
use crate::error::{ObjectiveError, PipelinerError};
use crate::listener::{GroupChecker, GroupEventListener};
use crate::objective::{NextObjective, NextOp};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use moka::notification::RemovalCause;
use moka::sync::Cache;
use parking_lot::Mutex;
use pipeliner_chain::{
    Chain, ChainElem, ChainHandle, ChainStore, ChainStoreAdapter, DependencyTracker,
};
use pipeliner_group::{
    DeviceId, Group, GroupBucket, GroupId, GroupIdAllocator, GroupKey, GroupService, NextId,
    SequenceGenerator,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Dependency record of the engine
pub(crate) type Elem = ChainElem<Arc<PendingNext>>;

/// What a pending objective completes into
#[derive(Debug)]
pub(crate) enum PendingKind {
    /// New chains; stored as a handle when the root is confirmed
    Create { handle: ChainHandle },
    /// More chains under an existing root
    AddBucket { chains: Vec<Chain> },
}

/// An objective waiting for device confirmations
#[derive(Debug)]
pub(crate) struct PendingNext {
    pub(crate) ticket: u64,
    pub(crate) objective: NextObjective,
    pub(crate) kind: PendingKind,
    settled: AtomicBool,
}

impl PendingNext {
    pub(crate) fn new(ticket: u64, objective: NextObjective, kind: PendingKind) -> Self {
        Self {
            ticket,
            objective,
            kind,
            settled: AtomicBool::new(false),
        }
    }

    /// Claim the completion; true for exactly one caller
    pub(crate) fn settle(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }
}

/// A removal waiting for every group of the chain to disappear
#[derive(Debug)]
pub(crate) struct PendingRemoval {
    pub(crate) objective: NextObjective,
    remaining: Mutex<HashSet<GroupKey>>,
    settled: AtomicBool,
}

impl PendingRemoval {
    fn new(objective: NextObjective, keys: impl IntoIterator<Item = GroupKey>) -> Self {
        Self {
            objective,
            remaining: Mutex::new(keys.into_iter().collect()),
            settled: AtomicBool::new(false),
        }
    }

    /// Mark one group gone; true only for the call that removes the last key
    pub(crate) fn confirm(&self, key: GroupKey) -> bool {
        let mut remaining = self.remaining.lock();
        remaining.remove(&key) && remaining.is_empty()
    }

    pub(crate) fn remaining(&self) -> Vec<GroupKey> {
        self.remaining.lock().iter().copied().collect()
    }

    pub(crate) fn settle(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// A bucket edit on a root, waiting for the device to report it
#[derive(Debug)]
pub(crate) struct PendingUpdate {
    ticket: u64,
    pub(crate) objective: NextObjective,
    pub(crate) key: GroupKey,
    added: Vec<GroupBucket>,
    removed: Vec<GroupBucket>,
    settled: AtomicBool,
}

impl PendingUpdate {
    pub(crate) fn new(
        ticket: u64,
        objective: NextObjective,
        key: GroupKey,
        added: Vec<GroupBucket>,
        removed: Vec<GroupBucket>,
    ) -> Self {
        Self {
            ticket,
            objective,
            key,
            added,
            removed,
            settled: AtomicBool::new(false),
        }
    }

    /// True once `group` holds every added bucket and none of the removed ones
    pub(crate) fn is_reflected_in(&self, group: &Group) -> bool {
        self.added.iter().all(|bucket| group.buckets.contains(bucket))
            && !self.removed.iter().any(|bucket| group.buckets.contains(bucket))
    }

    /// Error reported when the device never confirms the edit
    pub(crate) fn timeout_error(&self) -> ObjectiveError {
        if self.added.is_empty() {
            ObjectiveError::GroupRemovalFailed
        } else {
            ObjectiveError::GroupInstallationFailed
        }
    }

    pub(crate) fn settle(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Entries that timed out, drained by the sweep
enum Expired {
    Add(Arc<PendingNext>),
    Removal(Arc<PendingRemoval>),
    Update(Arc<PendingUpdate>),
}

/// An ADD whose root is not confirmed yet, plus the operations queued behind it
#[derive(Debug)]
pub(crate) struct InFlight {
    ticket: u64,
    pub(crate) deferred: Vec<NextObjective>,
}

/// Shared engine state
pub(crate) struct Inner {
    pub(crate) device_id: DeviceId,
    pub(crate) config: PipelinerConfig,
    pub(crate) groups: Arc<dyn GroupService>,
    pub(crate) store: ChainStoreAdapter,
    pub(crate) decomposer: ObjectiveDecomposer,
    pub(crate) tracker: DependencyTracker<Arc<PendingNext>>,
    pub(crate) pending: Cache<u64, Arc<PendingNext>>,
    pub(crate) awaiting_root: DashMap<GroupKey, Vec<Arc<PendingNext>>>,
    pub(crate) in_flight: DashMap<NextId, InFlight>,
    pub(crate) removals: Cache<NextId, Arc<PendingRemoval>>,
    pub(crate) updates: Cache<u64, Arc<PendingUpdate>>,
    expired: Arc<Mutex<Vec<Expired>>>,
    tickets: AtomicU64,
}

impl Inner {
    fn new(
        device_id: DeviceId,
        config: PipelinerConfig,
        groups: Arc<dyn GroupService>,
        store: Arc<dyn ChainStore>,
        sequence: Arc<dyn SequenceGenerator>,
    ) -> Self {
        let expired: Arc<Mutex<Vec<Expired>>> = Arc::default();

        let queue = Arc::clone(&expired);
        let pending = Cache::builder()
            .max_capacity(config.max_pending)
            .time_to_live(config.pending_ttl)
            .eviction_listener(
                move |_ticket: Arc<u64>, next: Arc<PendingNext>, cause: RemovalCause| {
                    if cause.was_evicted() {
                        queue.lock().push(Expired::Add(next));
                    }
                },
            )
            .build();

        let queue = Arc::clone(&expired);
        let removals = Cache::builder()
            .max_capacity(config.max_pending)
            .time_to_live(config.pending_ttl)
            .eviction_listener(
                move |_id: Arc<NextId>, removal: Arc<PendingRemoval>, cause: RemovalCause| {
                    if cause.was_evicted() {
                        queue.lock().push(Expired::Removal(removal));
                    }
                },
            )
            .build();

        let queue = Arc::clone(&expired);
        let updates = Cache::builder()
            .max_capacity(config.max_pending)
            .time_to_live(config.pending_ttl)
            .eviction_listener(
                move |_ticket: Arc<u64>, update: Arc<PendingUpdate>, cause: RemovalCause| {
                    if cause.was_evicted() {
                        queue.lock().push(Expired::Update(update));
                    }
                },
            )
            .build();

        let allocator = GroupIdAllocator::new(device_id.clone(), sequence);
        Self {
            device_id,
            config,
            groups,
            store: ChainStoreAdapter::new(store),
            decomposer: ObjectiveDecomposer::new(allocator),
            tracker: DependencyTracker::new(),
            pending,
            awaiting_root: DashMap::new(),
            in_flight: DashMap::new(),
            removals,
            updates,
            expired,
            tickets: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::Relaxed)
    }

    /// Dispatch one objective; every rejection is reported through its context
    pub(crate) fn next(&self, objective: NextObjective) {
        let id = objective.id();
        debug!(
            %id,
            kind = %objective.kind(),
            op = %objective.op(),
            device = %self.device_id,
            "next objective received"
        );

        let result = match objective.op() {
            NextOp::Add => self.add_chains(&objective),
            NextOp::AddToExisting => self.with_existing(&objective, |handle| {
                self.add_bucket(&objective, handle)
            }),
            NextOp::Remove => {
                self.with_existing(&objective, |handle| self.remove_chains(&objective, handle))
            }
            NextOp::RemoveFromExisting => self.with_existing(&objective, |handle| {
                self.remove_bucket(&objective, handle)
            }),
            NextOp::Verify => {
                self.with_existing(&objective, |handle| self.verify(&objective, handle))
            }
            op @ NextOp::Modify => Err(PipelinerError::UnsupportedOp(op)),
        };

        if let Err(e) = result {
            warn!(%id, op = %objective.op(), error = %e, "next objective rejected");
            objective.notify_error(e.objective_error());
        }
    }

    /// Run `op` against the stored handle, or queue the objective behind an ADD in flight
    fn with_existing(
        &self,
        objective: &NextObjective,
        op: impl FnOnce(&ChainHandle) -> Result<(), PipelinerError>,
    ) -> Result<(), PipelinerError> {
        let id = objective.id();
        if let Some(mut flight) = self.in_flight.get_mut(&id) {
            debug!(%id, op = %objective.op(), "chain still installing, operation deferred");
            flight.deferred.push(objective.clone());
            return Ok(());
        }
        let handle = self.store.get(id)?.ok_or(PipelinerError::UnknownNext(id))?;
        op(&handle)
    }

    fn add_chains(&self, objective: &NextObjective) -> Result<(), PipelinerError> {
        let id = objective.id();
        let plan = self.decomposer.decompose(objective)?;
        let handle = plan.handle()?;
        let ticket = self.next_ticket();

        match self.in_flight.entry(id) {
            Entry::Occupied(_) => return Err(PipelinerError::Duplicate(id)),
            Entry::Vacant(slot) => {
                if self.store.get(id)?.is_some() {
                    return Err(PipelinerError::Duplicate(id));
                }
                slot.insert(InFlight {
                    ticket,
                    deferred: Vec::new(),
                });
            }
        }

        let root = handle.root();
        debug!(
            %id,
            %root,
            chains = handle.chain_count(),
            leaves = plan.leaves.len(),
            "installing group chains"
        );
        let pending = Arc::new(PendingNext::new(
            ticket,
            objective.clone(),
            PendingKind::Create { handle },
        ));
        self.pending.insert(ticket, Arc::clone(&pending));
        self.awaiting_root
            .entry(root)
            .or_default()
            .push(Arc::clone(&pending));
        for parent in plan.parents {
            self.register(parent, &pending, false);
        }
        for leaf in plan.leaves {
            trace!(%id, key = %leaf.key, group = ?leaf.group_id, "submitting leaf group");
            self.groups.add_group(leaf);
        }
        Ok(())
    }

    /// Make `parent` wait on each of its children
    pub(crate) fn register(
        &self,
        parent: PlannedParent,
        owner: &Arc<PendingNext>,
        bucket_edit: bool,
    ) {
        let children = parent.children;
        let elem = Arc::new(ChainElem::new(
            parent.descriptor,
            children.len(),
            bucket_edit,
            Arc::clone(owner),
        ));
        for child in children {
            self.tracker.register(child, Arc::clone(&elem));
        }
    }

    /// A group is confirmed on the device
    pub(crate) fn process_added(&self, key: GroupKey) {
        for elem in self.tracker.resolve(key) {
            self.fire(&elem);
        }
        if let Some((_, waiting)) = self.awaiting_root.remove(&key) {
            for pending in waiting {
                self.complete(&pending);
            }
        }
    }

    fn fire(&self, elem: &Elem) {
        let owner = elem.owner();
        if owner.is_settled() {
            trace!(key = %elem.key(), "owner already settled, dropping parent");
            return;
        }
        if elem.is_bucket_edit() {
            self.finish_bucket_add(owner, elem.descriptor());
        } else {
            debug!(
                id = %owner.objective.id(),
                key = %elem.key(),
                age_ms = u64::try_from(elem.age().as_millis()).unwrap_or(u64::MAX),
                "children confirmed, creating parent group"
            );
            self.groups.add_group(elem.descriptor().clone());
        }
    }

    fn complete(&self, pending: &Arc<PendingNext>) {
        let PendingKind::Create { handle } = &pending.kind else {
            return;
        };
        if !pending.settle() {
            return;
        }
        self.pending.invalidate(&pending.ticket);

        let id = pending.objective.id();
        let stored = self.store.put(id, handle);
        let deferred = self.release(id, pending.ticket);
        match stored {
            Ok(()) => {
                info!(
                    %id,
                    root = %handle.root(),
                    chains = handle.chain_count(),
                    "next objective installed"
                );
                pending.objective.notify_success();
                for objective in deferred {
                    self.next(objective);
                }
            }
            Err(e) => {
                error!(%id, error = %e, "group chain installed but handle not stored");
                pending.objective.notify_error(ObjectiveError::Unknown);
                fail_deferred(deferred);
            }
        }
    }

    /// Settle a pending objective as failed and drop everything it registered
    pub(crate) fn fail(&self, pending: &Arc<PendingNext>, error: ObjectiveError) {
        if !pending.settle() {
            return;
        }
        self.pending.invalidate(&pending.ticket);
        let purged = self.tracker.purge(|owner| Arc::ptr_eq(owner, pending));

        let id = pending.objective.id();
        let mut deferred = Vec::new();
        if let PendingKind::Create { handle } = &pending.kind {
            let root = handle.root();
            if let Some(mut waiting) = self.awaiting_root.get_mut(&root) {
                waiting.retain(|other| !Arc::ptr_eq(other, pending));
            }
            self.awaiting_root.remove_if(&root, |_, waiting| waiting.is_empty());
            deferred = self.release(id, pending.ticket);
        }

        warn!(%id, %error, purged, "next objective failed");
        pending.objective.notify_error(error);
        fail_deferred(deferred);
    }

    /// Clear the in-flight marker of `ticket` and hand back what queued behind it
    fn release(&self, id: NextId, ticket: u64) -> Vec<NextObjective> {
        self.in_flight
            .remove_if(&id, |_, flight| flight.ticket == ticket)
            .map(|(_, flight)| flight.deferred)
            .unwrap_or_default()
    }

    /// The device rejected a group
    pub(crate) fn process_add_failed(&self, key: GroupKey) {
        let mut owners: Vec<Arc<PendingNext>> = Vec::new();
        let waiting_parents = self
            .tracker
            .take(key)
            .into_iter()
            .map(|elem| Arc::clone(elem.owner()));
        let waiting_roots = self
            .awaiting_root
            .remove(&key)
            .map(|(_, waiting)| waiting)
            .unwrap_or_default();
        for owner in waiting_parents.chain(waiting_roots) {
            if !owners.iter().any(|known| Arc::ptr_eq(known, &owner)) {
                owners.push(owner);
            }
        }
        if owners.is_empty() {
            trace!(%key, "add failure for untracked group");
        }
        for owner in owners {
            self.fail(&owner, ObjectiveError::GroupInstallationFailed);
        }
    }

    fn remove_chains(
        &self,
        objective: &NextObjective,
        handle: &ChainHandle,
    ) -> Result<(), PipelinerError> {
        let id = objective.id();
        let keys = handle.distinct_keys();
        let removal = Arc::new(PendingRemoval::new(objective.clone(), keys.iter().copied()));
        let entry = self.removals.entry(id).or_insert_with(|| Arc::clone(&removal));
        if !entry.is_fresh() {
            return Err(PipelinerError::RemovalPending(id));
        }

        debug!(%id, groups = keys.len(), "removing group chains");
        for key in keys {
            self.groups.remove_group(&self.device_id, key, objective.app_id());
        }
        Ok(())
    }

    /// A group is gone from the device
    pub(crate) fn process_removed(&self, key: GroupKey) {
        let finished: Vec<(NextId, Arc<PendingRemoval>)> = self
            .removals
            .iter()
            .filter(|(_, removal)| removal.confirm(key))
            .map(|(id, removal)| (*id, removal))
            .collect();
        for (id, removal) in finished {
            self.finish_removal(id, &removal);
        }
    }

    fn finish_removal(&self, id: NextId, removal: &Arc<PendingRemoval>) {
        if !removal.settle() {
            return;
        }
        self.removals.invalidate(&id);
        match self.store.remove(id) {
            Ok(()) => {
                info!(%id, "next objective removed");
                removal.objective.notify_success();
            }
            Err(e) => {
                error!(%id, error = %e, "groups removed but handle not deleted");
                removal.objective.notify_error(ObjectiveError::Unknown);
            }
        }
    }

    /// Track a bucket edit until the device reports the root updated
    pub(crate) fn await_update(
        &self,
        objective: NextObjective,
        key: GroupKey,
        added: Vec<GroupBucket>,
        removed: Vec<GroupBucket>,
    ) {
        let ticket = self.next_ticket();
        let update = PendingUpdate::new(ticket, objective, key, added, removed);
        self.updates.insert(ticket, Arc::new(update));
    }

    /// A root group changed on the device; every edit waiting on it passes
    pub(crate) fn process_updated(&self, key: GroupKey) {
        let done: Vec<Arc<PendingUpdate>> = self
            .updates
            .iter()
            .filter(|(_, update)| update.key == key)
            .map(|(_, update)| update)
            .collect();
        for update in done {
            self.finish_update(&update);
        }
    }

    fn finish_update(&self, update: &Arc<PendingUpdate>) {
        if !update.settle() {
            return;
        }
        self.updates.invalidate(&update.ticket);
        info!(id = %update.objective.id(), root = %update.key, "bucket edit confirmed");
        update.objective.notify_success();
    }

    /// Compare outstanding work with the device and settle what is already done
    pub(crate) fn poll(&self) {
        let mut candidates: HashSet<GroupKey> = self.tracker.keys().into_iter().collect();
        candidates.extend(self.awaiting_root.iter().map(|entry| *entry.key()));
        for key in candidates {
            if self.groups.get_group(&self.device_id, key).is_some() {
                trace!(%key, "group present on device");
                self.process_added(key);
            }
        }

        let gone: HashSet<GroupKey> = self
            .removals
            .iter()
            .flat_map(|(_, removal)| removal.remaining())
            .filter(|key| self.groups.get_group(&self.device_id, *key).is_none())
            .collect();
        for key in gone {
            trace!(%key, "group absent from device");
            self.process_removed(key);
        }

        let reflected: Vec<Arc<PendingUpdate>> = self
            .updates
            .iter()
            .map(|(_, update)| update)
            .filter(|update| {
                self.groups
                    .get_group(&self.device_id, update.key)
                    .is_some_and(|group| update.is_reflected_in(&group))
            })
            .collect();
        for update in reflected {
            trace!(key = %update.key, "bucket edit visible on device");
            self.finish_update(&update);
        }
    }

    /// Fail whatever outlived the pending TTL
    pub(crate) fn sweep(&self) {
        self.pending.run_pending_tasks();
        self.removals.run_pending_tasks();
        self.updates.run_pending_tasks();
        let expired = std::mem::take(&mut *self.expired.lock());

        let ttl_ms = u64::try_from(self.config.pending_ttl.as_millis()).unwrap_or(u64::MAX);
        for record in expired {
            match record {
                Expired::Add(pending) => {
                    warn!(id = %pending.objective.id(), ttl_ms, "group chain not confirmed in time");
                    self.fail(&pending, ObjectiveError::GroupInstallationFailed);
                }
                Expired::Removal(removal) => {
                    if removal.settle() {
                        warn!(
                            id = %removal.objective.id(),
                            ttl_ms,
                            remaining = removal.remaining().len(),
                            "group chain not removed in time"
                        );
                        removal.objective.notify_error(ObjectiveError::GroupRemovalFailed);
                    }
                }
                Expired::Update(update) => {
                    if update.settle() {
                        let error = update.timeout_error();
                        warn!(
                            id = %update.objective.id(),
                            root = %update.key,
                            ttl_ms,
                            %error,
                            "bucket edit not confirmed in time"
                        );
                        update.objective.notify_error(error);
                    }
                }
            }
        }
    }

    pub(crate) fn check_pending(&self) {
        self.poll();
        self.sweep();
    }
}

fn fail_deferred(deferred: Vec<NextObjective>) {
    for objective in deferred {
        debug!(id = %objective.id(), op = %objective.op(), "dropping deferred operation");
        objective.notify_error(ObjectiveError::GroupMissing);
    }
}

/// OF-DPA next-objective pipeliner for one device
///
/// # Example
///
/// ```rust,ignore
/// let pipeliner = GroupPipeliner::new(device, PipelinerConfig::default(), groups, store, sequence);
/// pipeliner.spawn_checker();
/// pipeliner.next(objective);
/// ```
pub struct GroupPipeliner {
    inner: Arc<Inner>,
    checker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for GroupPipeliner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupPipeliner")
            .field("device_id", &self.inner.device_id)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl GroupPipeliner {
    /// Create a pipeliner and subscribe it to group events
    ///
    /// The periodic checker is not started; see [`GroupPipeliner::spawn_checker`].
    pub fn new(
        device_id: DeviceId,
        config: PipelinerConfig,
        groups: Arc<dyn GroupService>,
        store: Arc<dyn ChainStore>,
        sequence: Arc<dyn SequenceGenerator>,
    ) -> Self {
        let inner = Arc::new(Inner::new(device_id, config, groups, store, sequence));
        inner
            .groups
            .add_listener(Arc::new(GroupEventListener::new(Arc::downgrade(&inner))));
        info!(
            device = %inner.device_id,
            ttl_ms = u64::try_from(inner.config.pending_ttl.as_millis()).unwrap_or(u64::MAX),
            "group pipeliner initialized"
        );
        Self {
            inner,
            checker: Mutex::new(None),
        }
    }

    /// Like [`GroupPipeliner::new`], validating the configuration first
    ///
    /// # Errors
    /// Returns `PipelinerError::InvalidConfig` if the configuration is unusable
    pub fn try_new(
        device_id: DeviceId,
        config: PipelinerConfig,
        groups: Arc<dyn GroupService>,
        store: Arc<dyn ChainStore>,
        sequence: Arc<dyn SequenceGenerator>,
    ) -> Result<Self, PipelinerError> {
        config.validate()?;
        Ok(Self::new(device_id, config, groups, store, sequence))
    }

    /// Managed device
    #[inline]
    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.inner.device_id
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelinerConfig {
        &self.inner.config
    }

    /// Submit a next objective
    ///
    /// Returns immediately. The outcome is reported exactly once through
    /// the objective's context.
    pub fn next(&self, objective: NextObjective) {
        self.inner.next(objective);
    }

    /// Human-readable chains of a handle, one line per chain
    #[must_use]
    pub fn next_mappings(&self, handle: &ChainHandle) -> Vec<String> {
        self.inner.next_mappings(handle)
    }

    /// Chain handle stored for an objective
    ///
    /// # Errors
    /// Returns an error if the store fails or holds an undecodable blob
    pub fn stored_handle(&self, id: NextId) -> Result<Option<ChainHandle>, PipelinerError> {
        Ok(self.inner.store.get(id)?)
    }

    /// Device id of the root group, which flow rules point at
    ///
    /// # Errors
    /// Returns an error if the store fails or holds an undecodable blob
    pub fn root_group_id(&self, id: NextId) -> Result<Option<GroupId>, PipelinerError> {
        let Some(handle) = self.inner.store.get(id)? else {
            return Ok(None);
        };
        Ok(self
            .inner
            .groups
            .get_group(&self.inner.device_id, handle.root())
            .map(|group| group.id))
    }

    /// Snapshot of outstanding work
    #[must_use]
    pub fn stats(&self) -> PipelinerStats {
        self.inner.stats()
    }

    /// Run one checker pass now
    pub fn check_pending(&self) {
        self.inner.check_pending();
    }

    /// Start the periodic checker on the current Tokio runtime
    ///
    /// Calling it again while the checker runs has no effect.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime
    pub fn spawn_checker(&self) {
        let mut slot = self.checker.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let checker = GroupChecker::new(Arc::downgrade(&self.inner));
        let period = self.inner.config.poll_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !checker.run() {
                    break;
                }
            }
        }));
        debug!(
            device = %self.inner.device_id,
            period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "group checker started"
        );
    }

    /// Stop the periodic checker
    pub fn shutdown(&self) {
        if let Some(task) = self.checker.lock().take() {
            task.abort();
            debug!(device = %self.inner.device_id, "group checker stopped");
        }
    }
}

impl Drop for GroupPipeliner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::NextType;
    use pipeliner_group::{AppId, GroupType, Treatment};

    fn objective() -> NextObjective {
        NextObjective::builder(NextId::new(1), NextType::Hashed).remove()
    }

    #[test]
    fn removal_confirms_once_when_emptied() {
        let a = GroupKey::from_raw(1);
        let b = GroupKey::from_raw(2);
        let removal = PendingRemoval::new(objective(), [a, b]);

        assert!(!removal.confirm(a));
        assert!(!removal.confirm(a));
        assert!(removal.confirm(b));
        assert!(!removal.confirm(b));
        assert!(removal.remaining().is_empty());
    }

    #[test]
    fn settle_is_one_shot() {
        let pending = PendingNext::new(
            7,
            objective(),
            PendingKind::AddBucket {
                chains: vec![Chain::new(GroupKey::from_raw(3))],
            },
        );
        assert!(!pending.is_settled());
        assert!(pending.settle());
        assert!(!pending.settle());
        assert!(pending.is_settled());

        let removal = PendingRemoval::new(objective(), []);
        assert!(removal.settle());
        assert!(!removal.settle());
    }

    #[test]
    fn update_is_reflected_by_bucket_contents() {
        let a = GroupBucket::new(Treatment::builder().group(GroupId::from_raw(0x2000_0001)).build());
        let b = GroupBucket::new(Treatment::builder().group(GroupId::from_raw(0x2000_0002)).build());
        let root = |buckets: Vec<GroupBucket>| Group {
            id: GroupId::from_raw(0x7000_0001),
            key: GroupKey::from_raw(0x7000_0001),
            device_id: DeviceId::new("of:1"),
            group_type: GroupType::Select,
            buckets,
            app_id: AppId::new("test"),
        };

        let grow = PendingUpdate::new(1, objective(), GroupKey::from_raw(1), vec![b.clone()], vec![]);
        assert!(!grow.is_reflected_in(&root(vec![a.clone()])));
        assert!(grow.is_reflected_in(&root(vec![a.clone(), b.clone()])));
        assert_eq!(grow.timeout_error(), ObjectiveError::GroupInstallationFailed);

        let shrink = PendingUpdate::new(2, objective(), GroupKey::from_raw(1), vec![], vec![b.clone()]);
        assert!(!shrink.is_reflected_in(&root(vec![a.clone(), b])));
        assert!(shrink.is_reflected_in(&root(vec![a])));
        assert_eq!(shrink.timeout_error(), ObjectiveError::GroupRemovalFailed);
    }
}
