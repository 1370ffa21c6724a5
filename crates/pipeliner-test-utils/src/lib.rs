//! Testing utilities for the pipeliner workspace
//!
//! A scripted group subsystem, a recording objective context, and
//! objective fixtures.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc, clippy::must_use_candidate)]

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use pipeliner_chain::MemoryChainStore;
use pipeliner_core::{
    GroupPipeliner, NextObjective, NextObjectiveBuilder, NextType, ObjectiveContext,
    ObjectiveError, PipelinerConfig,
};
use pipeliner_group::{
    AppId, AtomicSequence, DeviceId, Group, GroupBucket, GroupDescriptor, GroupEvent,
    GroupEventKind, GroupId, GroupKey, GroupListener, GroupService, IpPrefix, MacAddress,
    MplsLabel, NextId, PortNumber, Selector, Treatment, VlanId,
};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEVICE: &str = "of:0000000000000001";

/// A call made against the group subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupRequest {
    Add(GroupDescriptor),
    Remove(GroupKey),
    AddBuckets { key: GroupKey, buckets: Vec<GroupBucket> },
    RemoveBuckets { key: GroupKey, buckets: Vec<GroupBucket> },
}

/// In-memory group subsystem driven by the test
///
/// In manual mode nothing happens until the test confirms, fails or
/// removes a group, or confirms a bucket edit. In auto mode every add,
/// remove and bucket edit is applied and announced synchronously.
#[derive(Default)]
pub struct ScriptedGroupService {
    auto: AtomicBool,
    installed: DashMap<GroupKey, Group>,
    submitted: Mutex<Vec<GroupDescriptor>>,
    removing: Mutex<Vec<(DeviceId, GroupKey)>>,
    editing: Mutex<Vec<(DeviceId, GroupRequest)>>,
    rejected: Mutex<HashSet<GroupKey>>,
    requests: Mutex<Vec<GroupRequest>>,
    listeners: RwLock<Vec<Arc<dyn GroupListener>>>,
}

impl ScriptedGroupService {
    pub fn manual() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn auto_confirming() -> Arc<Self> {
        let service = Self::default();
        service.auto.store(true, Ordering::SeqCst);
        Arc::new(service)
    }

    pub fn set_auto_confirm(&self, auto: bool) {
        self.auto.store(auto, Ordering::SeqCst);
    }

    /// In auto mode, answer adds of `key` with ADD_FAILED
    pub fn reject(&self, key: GroupKey) {
        self.rejected.lock().insert(key);
    }

    pub fn requests(&self) -> Vec<GroupRequest> {
        self.requests.lock().clone()
    }

    /// Keys of every add request, in submission order
    pub fn add_order(&self) -> Vec<GroupKey> {
        self.requests
            .lock()
            .iter()
            .filter_map(|request| match request {
                GroupRequest::Add(descriptor) => Some(descriptor.key),
                _ => None,
            })
            .collect()
    }

    pub fn add_count(&self, key: GroupKey) -> usize {
        self.add_order().into_iter().filter(|k| *k == key).count()
    }

    pub fn remove_order(&self) -> Vec<GroupKey> {
        self.requests
            .lock()
            .iter()
            .filter_map(|request| match request {
                GroupRequest::Remove(key) => Some(*key),
                _ => None,
            })
            .collect()
    }

    /// Submitted adds not yet confirmed or failed
    pub fn submitted(&self) -> Vec<GroupKey> {
        self.submitted.lock().iter().map(|d| d.key).collect()
    }

    pub fn pending_removals(&self) -> Vec<GroupKey> {
        self.removing.lock().iter().map(|(_, key)| *key).collect()
    }

    /// Root keys of bucket edits not yet applied, in request order
    pub fn pending_edits(&self) -> Vec<GroupKey> {
        self.editing
            .lock()
            .iter()
            .filter_map(|(_, request)| match request {
                GroupRequest::AddBuckets { key, .. } | GroupRequest::RemoveBuckets { key, .. } => {
                    Some(*key)
                }
                _ => None,
            })
            .collect()
    }

    /// Number of add-bucket requests made against `key`
    pub fn bucket_adds(&self, key: GroupKey) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| matches!(request, GroupRequest::AddBuckets { key: k, .. } if *k == key))
            .count()
    }

    pub fn group(&self, key: GroupKey) -> Option<Group> {
        self.installed.get(&key).map(|group| group.clone())
    }

    pub fn is_installed(&self, key: GroupKey) -> bool {
        self.installed.contains_key(&key)
    }

    pub fn installed_len(&self) -> usize {
        self.installed.len()
    }

    /// Confirm a submitted add; false if `key` was not submitted
    pub fn confirm(&self, key: GroupKey) -> bool {
        let Some(descriptor) = self.take_submitted(key) else {
            return false;
        };
        let group = self.install(&descriptor);
        self.emit(GroupEvent::new(
            GroupEventKind::Added,
            key,
            Some(group.id),
            descriptor.device_id,
        ));
        true
    }

    /// Confirm submitted adds and bucket edits until none are left, including what they unlock
    pub fn confirm_all(&self) -> usize {
        let mut confirmed = 0;
        loop {
            let keys = self.submitted();
            let edits = self.pending_edits();
            if keys.is_empty() && edits.is_empty() {
                return confirmed;
            }
            for key in keys {
                if self.confirm(key) {
                    confirmed += 1;
                }
            }
            for key in edits {
                if self.confirm_edit(key) {
                    confirmed += 1;
                }
            }
        }
    }

    /// Apply the oldest bucket edit on `key` and announce it
    pub fn confirm_edit(&self, key: GroupKey) -> bool {
        let Some(device_id) = self.apply_edit(key) else {
            return false;
        };
        let id = self.group(key).map(|group| group.id);
        self.emit(GroupEvent::new(GroupEventKind::Updated, key, id, device_id));
        true
    }

    /// Apply the oldest bucket edit on `key` without announcing it
    pub fn apply_edit_silently(&self, key: GroupKey) -> bool {
        self.apply_edit(key).is_some()
    }

    /// Drop the bucket at `index` of an installed group, as a switch reboot might
    pub fn strip_bucket(&self, key: GroupKey, index: usize) -> Option<GroupBucket> {
        let mut group = self.installed.get_mut(&key)?;
        (index < group.buckets.len()).then(|| group.buckets.remove(index))
    }

    /// Install a submitted add without announcing it
    pub fn install_silently(&self, key: GroupKey) -> bool {
        match self.take_submitted(key) {
            Some(descriptor) => {
                self.install(&descriptor);
                true
            }
            None => false,
        }
    }

    /// Answer a submitted add with ADD_FAILED
    pub fn fail(&self, key: GroupKey) -> bool {
        let Some(descriptor) = self.take_submitted(key) else {
            return false;
        };
        self.emit(GroupEvent::new(
            GroupEventKind::AddFailed,
            key,
            descriptor.group_id,
            descriptor.device_id,
        ));
        true
    }

    /// Announce an installed group again
    pub fn redeliver_added(&self, key: GroupKey) {
        if let Some(group) = self.group(key) {
            self.emit(GroupEvent::new(
                GroupEventKind::Added,
                key,
                Some(group.id),
                group.device_id,
            ));
        }
    }

    /// Apply a requested removal and announce it
    pub fn confirm_removal(&self, key: GroupKey) -> bool {
        let Some(device_id) = self.take_removing(key) else {
            return false;
        };
        let id = self.installed.remove(&key).map(|(_, group)| group.id);
        self.emit(GroupEvent::new(GroupEventKind::Removed, key, id, device_id));
        true
    }

    pub fn confirm_all_removals(&self) -> usize {
        self.pending_removals()
            .into_iter()
            .filter(|key| self.confirm_removal(*key))
            .count()
    }

    /// Apply a requested removal without announcing it
    pub fn remove_silently(&self, key: GroupKey) -> bool {
        let known = self.take_removing(key).is_some();
        self.installed.remove(&key);
        known
    }

    fn take_submitted(&self, key: GroupKey) -> Option<GroupDescriptor> {
        let mut submitted = self.submitted.lock();
        let index = submitted.iter().position(|d| d.key == key)?;
        Some(submitted.remove(index))
    }

    fn apply_edit(&self, key: GroupKey) -> Option<DeviceId> {
        let (device_id, request) = {
            let mut editing = self.editing.lock();
            let index = editing.iter().position(|(_, request)| {
                matches!(
                    request,
                    GroupRequest::AddBuckets { key: k, .. } | GroupRequest::RemoveBuckets { key: k, .. }
                        if *k == key
                )
            })?;
            editing.remove(index)
        };
        if let Some(mut group) = self.installed.get_mut(&key) {
            match request {
                GroupRequest::AddBuckets { buckets, .. } => group.buckets.extend(buckets),
                GroupRequest::RemoveBuckets { buckets, .. } => {
                    group.buckets.retain(|bucket| !buckets.contains(bucket));
                }
                GroupRequest::Add(_) | GroupRequest::Remove(_) => {}
            }
        }
        Some(device_id)
    }

    fn take_removing(&self, key: GroupKey) -> Option<DeviceId> {
        let mut removing = self.removing.lock();
        let index = removing.iter().position(|(_, k)| *k == key)?;
        Some(removing.remove(index).0)
    }

    fn install(&self, descriptor: &GroupDescriptor) -> Group {
        let id = descriptor
            .group_id
            .unwrap_or_else(|| GroupId::from_raw(descriptor.key.raw()));
        let group = Group::from_descriptor(descriptor, id);
        self.installed.insert(descriptor.key, group.clone());
        group
    }

    fn emit(&self, event: GroupEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.event(&event);
        }
    }
}

impl GroupService for ScriptedGroupService {
    fn add_group(&self, descriptor: GroupDescriptor) {
        self.requests.lock().push(GroupRequest::Add(descriptor.clone()));
        let key = descriptor.key;
        self.submitted.lock().push(descriptor);
        if self.auto.load(Ordering::SeqCst) {
            if self.rejected.lock().contains(&key) {
                self.fail(key);
            } else {
                self.confirm(key);
            }
        }
    }

    fn remove_group(&self, device_id: &DeviceId, key: GroupKey, _app_id: &AppId) {
        self.requests.lock().push(GroupRequest::Remove(key));
        self.removing.lock().push((device_id.clone(), key));
        if self.auto.load(Ordering::SeqCst) {
            self.confirm_removal(key);
        }
    }

    fn add_buckets_to_group(
        &self,
        device_id: &DeviceId,
        key: GroupKey,
        buckets: Vec<GroupBucket>,
        _app_id: &AppId,
    ) {
        let request = GroupRequest::AddBuckets { key, buckets };
        self.requests.lock().push(request.clone());
        self.editing.lock().push((device_id.clone(), request));
        if self.auto.load(Ordering::SeqCst) {
            self.confirm_edit(key);
        }
    }

    fn remove_buckets_from_group(
        &self,
        device_id: &DeviceId,
        key: GroupKey,
        buckets: Vec<GroupBucket>,
        _app_id: &AppId,
    ) {
        let request = GroupRequest::RemoveBuckets { key, buckets };
        self.requests.lock().push(request.clone());
        self.editing.lock().push((device_id.clone(), request));
        if self.auto.load(Ordering::SeqCst) {
            self.confirm_edit(key);
        }
    }

    fn get_group(&self, device_id: &DeviceId, key: GroupKey) -> Option<Group> {
        self.group(key).filter(|group| &group.device_id == device_id)
    }

    fn add_listener(&self, listener: Arc<dyn GroupListener>) {
        self.listeners.write().push(listener);
    }
}

/// A callback delivered to an objective context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success(NextId),
    Failure(NextId, ObjectiveError),
}

/// Context that records every callback
#[derive(Debug, Default)]
pub struct RecordingContext {
    outcomes: Mutex<Vec<Outcome>>,
}

impl RecordingContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().clone()
    }

    pub fn outcomes_for(&self, id: NextId) -> Vec<Outcome> {
        self.outcomes()
            .into_iter()
            .filter(|outcome| match outcome {
                Outcome::Success(n) | Outcome::Failure(n, _) => *n == id,
            })
            .collect()
    }

    pub fn successes(&self) -> usize {
        self.outcomes()
            .iter()
            .filter(|outcome| matches!(outcome, Outcome::Success(_)))
            .count()
    }

    pub fn failures(&self) -> Vec<ObjectiveError> {
        self.outcomes()
            .iter()
            .filter_map(|outcome| match outcome {
                Outcome::Failure(_, error) => Some(*error),
                Outcome::Success(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.lock().is_empty()
    }
}

impl ObjectiveContext for RecordingContext {
    fn on_success(&self, objective: &NextObjective) {
        self.outcomes.lock().push(Outcome::Success(objective.id()));
    }

    fn on_error(&self, objective: &NextObjective, error: ObjectiveError) {
        self.outcomes
            .lock()
            .push(Outcome::Failure(objective.id(), error));
    }
}

pub fn device() -> DeviceId {
    DeviceId::new(DEVICE)
}

pub fn vlan(id: u16) -> VlanId {
    VlanId::new(id).unwrap()
}

pub fn port(number: u64) -> PortNumber {
    PortNumber::new(number)
}

pub fn mac(last: u8) -> MacAddress {
    MacAddress::new([0x00, 0x00, 0x5e, 0x00, 0x53, last])
}

pub fn vlan_meta(id: u16) -> Selector {
    Selector::builder().match_vlan_id(vlan(id)).build()
}

pub fn multicast_meta(id: u16, group: Ipv4Addr) -> Selector {
    Selector::builder()
        .match_vlan_id(vlan(id))
        .match_ipv4_dst(IpPrefix::host(group))
        .build()
}

/// Plain output
pub fn framing(out: u64) -> Treatment {
    Treatment::builder().output(port(out)).build()
}

/// Next-hop rewrite then output
pub fn routed(out: u64) -> Treatment {
    Treatment::builder()
        .set_eth_src(mac(1))
        .set_eth_dst(mac(u8::try_from(out % 256).unwrap()))
        .output(port(out))
        .build()
}

/// Next-hop rewrite with one MPLS label
pub fn labelled(out: u64, label: u32) -> Treatment {
    Treatment::builder()
        .set_eth_src(mac(1))
        .set_eth_dst(mac(u8::try_from(out % 256).unwrap()))
        .push_mpls()
        .set_mpls_label(MplsLabel::new(label).unwrap())
        .output(port(out))
        .build()
}

pub fn simple(id: u32, treatment: Treatment, vlan_id: u16) -> NextObjectiveBuilder {
    NextObjective::builder(NextId::new(id), NextType::Simple)
        .with_treatment(treatment)
        .with_meta(vlan_meta(vlan_id))
}

pub fn broadcast(id: u32, ports: &[u64], vlan_id: u16) -> NextObjectiveBuilder {
    NextObjective::builder(NextId::new(id), NextType::Broadcast)
        .with_treatments(ports.iter().map(|p| framing(*p)))
        .with_meta(vlan_meta(vlan_id))
}

pub fn hashed(id: u32, ports: &[u64], vlan_id: u16) -> NextObjectiveBuilder {
    NextObjective::builder(NextId::new(id), NextType::Hashed)
        .with_treatments(ports.iter().map(|p| routed(*p)))
        .with_meta(vlan_meta(vlan_id))
}

/// Hashed objective whose buckets push one MPLS label each
pub fn hashed_labelled(id: u32, buckets: &[(u64, u32)], vlan_id: u16) -> NextObjectiveBuilder {
    NextObjective::builder(NextId::new(id), NextType::Hashed)
        .with_treatments(buckets.iter().map(|(out, label)| labelled(*out, *label)))
        .with_meta(vlan_meta(vlan_id))
}

/// Short TTL and poll interval for timing tests
pub fn fast_config() -> PipelinerConfig {
    PipelinerConfig::new()
        .with_pending_ttl(Duration::from_millis(200))
        .with_poll_interval(Duration::from_millis(20))
}

/// A pipeliner wired to a scripted device, an in-memory store and a recording context
pub struct Harness {
    pub groups: Arc<ScriptedGroupService>,
    pub store: Arc<MemoryChainStore>,
    pub context: Arc<RecordingContext>,
    pub pipeliner: GroupPipeliner,
}

impl Harness {
    pub fn manual() -> Self {
        Self::with(ScriptedGroupService::manual(), PipelinerConfig::default())
    }

    pub fn auto() -> Self {
        Self::with(ScriptedGroupService::auto_confirming(), PipelinerConfig::default())
    }

    pub fn with(groups: Arc<ScriptedGroupService>, config: PipelinerConfig) -> Self {
        let store = Arc::new(MemoryChainStore::new());
        let pipeliner = GroupPipeliner::new(
            device(),
            config,
            groups.clone(),
            store.clone(),
            Arc::new(AtomicSequence::new()),
        );
        Self {
            groups,
            store,
            context: RecordingContext::new(),
            pipeliner,
        }
    }

    /// Attach the recording context and submit
    pub fn submit(&self, builder: NextObjectiveBuilder, build: fn(NextObjectiveBuilder) -> NextObjective) {
        self.pipeliner
            .next(build(builder.with_context(self.context.clone())));
    }

    /// Stored root key of an objective
    pub fn root(&self, id: u32) -> GroupKey {
        self.pipeliner
            .stored_handle(NextId::new(id))
            .unwrap()
            .unwrap()
            .root()
    }
}
