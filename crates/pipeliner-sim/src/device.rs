//! Simulated switch group table
//!
//! Requests take effect after a seeded random delay on the Tokio runtime.
//! Confirmation events can be lost and adds can be rejected, so the
//! engine's event path, poll path and TTL path all get exercised.
//!
//! Every request that points at other groups is checked against the table
//! at submission time: a reference to a group that is not installed yet is
//! recorded as an ordering violation.

use crate::config::DeviceConfig;
use crate::error::SimError;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use pipeliner_group::{
    AppId, DeviceId, Group, GroupBucket, GroupDescriptor, GroupEvent, GroupEventKind, GroupId,
    GroupKey, GroupListener, GroupService,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{trace, warn};

/// A request referenced a group before it was installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingViolation {
    /// Group whose request carried the reference
    pub parent: GroupKey,
    /// Referenced group id
    pub missing: GroupId,
}

/// Counters of a simulated device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStats {
    /// Group adds requested
    pub adds: u64,
    /// Group removals requested
    pub removes: u64,
    /// Bucket additions and removals requested
    pub bucket_edits: u64,
    /// Adds answered with ADD_FAILED
    pub rejected: u64,
    /// Applied requests whose event was dropped
    pub lost_events: u64,
    /// Groups currently installed
    pub installed: usize,
}

#[derive(Default)]
struct Counters {
    adds: AtomicU64,
    removes: AtomicU64,
    bucket_edits: AtomicU64,
    rejected: AtomicU64,
    lost_events: AtomicU64,
}

struct DeviceState {
    device_id: DeviceId,
    config: DeviceConfig,
    rng: Mutex<StdRng>,
    table: DashMap<GroupKey, Group>,
    ids: DashMap<GroupId, GroupKey>,
    listeners: RwLock<Vec<Arc<dyn GroupListener>>>,
    counters: Counters,
    violations: Mutex<Vec<OrderingViolation>>,
    runtime: Handle,
}

impl DeviceState {
    fn delay(&self) -> Duration {
        let jitter = if self.config.jitter_ms == 0 {
            0
        } else {
            self.rng.lock().random_range(0..=self.config.jitter_ms)
        };
        Duration::from_millis(self.config.latency_ms + jitter)
    }

    fn roll(&self, probability: f64) -> bool {
        probability > 0.0 && self.rng.lock().random_bool(probability)
    }

    fn check_references(&self, parent: GroupKey, buckets: &[GroupBucket]) {
        for bucket in buckets {
            if let Some(target) = bucket.treatment.group() {
                if !self.ids.contains_key(&target) {
                    warn!(%parent, missing = %target, "group referenced before installation");
                    self.violations.lock().push(OrderingViolation {
                        parent,
                        missing: target,
                    });
                }
            }
        }
    }

    /// Deliver an event unless the loss roll says otherwise
    fn announce(&self, kind: GroupEventKind, key: GroupKey, id: Option<GroupId>) {
        if self.roll(self.config.event_loss) {
            self.counters.lost_events.fetch_add(1, Ordering::Relaxed);
            trace!(?kind, %key, "event lost");
            return;
        }
        self.deliver(GroupEvent::new(kind, key, id, self.device_id.clone()));
    }

    fn deliver(&self, event: GroupEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.event(&event);
        }
    }

    fn install(&self, descriptor: &GroupDescriptor) -> GroupId {
        let id = descriptor
            .group_id
            .unwrap_or_else(|| GroupId::from_raw(descriptor.key.raw()));
        self.table
            .insert(descriptor.key, Group::from_descriptor(descriptor, id));
        self.ids.insert(id, descriptor.key);
        id
    }

    fn uninstall(&self, key: GroupKey) -> Option<GroupId> {
        let (_, group) = self.table.remove(&key)?;
        self.ids.remove_if(&group.id, |_, owner| *owner == key);
        Some(group.id)
    }
}

/// Group subsystem of one simulated switch
#[derive(Clone)]
pub struct SimulatedDevice {
    state: Arc<DeviceState>,
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("device_id", &self.state.device_id)
            .field("config", &self.state.config)
            .field("installed", &self.state.table.len())
            .finish_non_exhaustive()
    }
}

impl SimulatedDevice {
    /// Create a device bound to the current Tokio runtime
    ///
    /// # Errors
    /// Returns `SimError::NoRuntime` outside a runtime
    pub fn new(device_id: DeviceId, config: DeviceConfig, seed: u64) -> Result<Self, SimError> {
        let runtime = Handle::try_current()?;
        Ok(Self {
            state: Arc::new(DeviceState {
                device_id,
                config,
                rng: Mutex::new(StdRng::seed_from_u64(seed)),
                table: DashMap::new(),
                ids: DashMap::new(),
                listeners: RwLock::new(Vec::new()),
                counters: Counters::default(),
                violations: Mutex::new(Vec::new()),
                runtime,
            }),
        })
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> DeviceStats {
        let counters = &self.state.counters;
        DeviceStats {
            adds: counters.adds.load(Ordering::Relaxed),
            removes: counters.removes.load(Ordering::Relaxed),
            bucket_edits: counters.bucket_edits.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            lost_events: counters.lost_events.load(Ordering::Relaxed),
            installed: self.state.table.len(),
        }
    }

    /// Ordering violations seen so far
    #[must_use]
    pub fn violations(&self) -> Vec<OrderingViolation> {
        self.state.violations.lock().clone()
    }

    /// Installed group by key
    #[must_use]
    pub fn group(&self, key: GroupKey) -> Option<Group> {
        self.state.table.get(&key).map(|group| group.clone())
    }
}

impl GroupService for SimulatedDevice {
    fn add_group(&self, descriptor: GroupDescriptor) {
        let state = Arc::clone(&self.state);
        state.counters.adds.fetch_add(1, Ordering::Relaxed);
        state.check_references(descriptor.key, &descriptor.buckets);
        let delay = state.delay();
        let reject = state.roll(state.config.reject_rate);

        self.state.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if reject {
                state.counters.rejected.fetch_add(1, Ordering::Relaxed);
                trace!(key = %descriptor.key, "group add rejected");
                // rejections are never lost
                state.deliver(GroupEvent::new(
                    GroupEventKind::AddFailed,
                    descriptor.key,
                    descriptor.group_id,
                    state.device_id.clone(),
                ));
                return;
            }
            let id = state.install(&descriptor);
            state.announce(GroupEventKind::Added, descriptor.key, Some(id));
        });
    }

    fn remove_group(&self, _device_id: &DeviceId, key: GroupKey, _app_id: &AppId) {
        let state = Arc::clone(&self.state);
        state.counters.removes.fetch_add(1, Ordering::Relaxed);
        let delay = state.delay();

        self.state.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let id = state.uninstall(key);
            state.announce(GroupEventKind::Removed, key, id);
        });
    }

    fn add_buckets_to_group(
        &self,
        _device_id: &DeviceId,
        key: GroupKey,
        buckets: Vec<GroupBucket>,
        _app_id: &AppId,
    ) {
        let state = Arc::clone(&self.state);
        state.counters.bucket_edits.fetch_add(1, Ordering::Relaxed);
        state.check_references(key, &buckets);
        let delay = state.delay();

        self.state.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let id = state.table.get_mut(&key).map(|mut group| {
                group.buckets.extend(buckets);
                group.id
            });
            state.announce(GroupEventKind::Updated, key, id);
        });
    }

    fn remove_buckets_from_group(
        &self,
        _device_id: &DeviceId,
        key: GroupKey,
        buckets: Vec<GroupBucket>,
        _app_id: &AppId,
    ) {
        let state = Arc::clone(&self.state);
        state.counters.bucket_edits.fetch_add(1, Ordering::Relaxed);
        let delay = state.delay();

        self.state.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let id = state.table.get_mut(&key).map(|mut group| {
                group.buckets.retain(|bucket| !buckets.contains(bucket));
                group.id
            });
            state.announce(GroupEventKind::Updated, key, id);
        });
    }

    fn get_group(&self, device_id: &DeviceId, key: GroupKey) -> Option<Group> {
        if device_id != &self.state.device_id {
            return None;
        }
        self.group(key)
    }

    fn add_listener(&self, listener: Arc<dyn GroupListener>) {
        self.state.listeners.write().push(listener);
    }
}
