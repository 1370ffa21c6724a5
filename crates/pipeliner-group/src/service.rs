//! Downstream collaborators
//!
//! The pipeliner never talks to a device directly. Group operations go
//! through a [`GroupService`], whose outcomes arrive later as
//! [`GroupEvent`]s on registered [`GroupListener`]s. Sequence-allocated
//! group ids come from a [`SequenceGenerator`].
//!
//! All three are injected at construction time as trait objects.

use crate::group::{Group, GroupBucket, GroupDescriptor, GroupEvent};
use crate::id::GroupKey;
use crate::types::{AppId, DeviceId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receiver of group notifications
pub trait GroupListener: Send + Sync {
    /// Handle one event; must not block
    fn event(&self, event: &GroupEvent);
}

/// Device group subsystem
///
/// Every mutating call only submits a request. Completion is reported
/// asynchronously through listeners, or observed by polling [`GroupService::get_group`].
pub trait GroupService: Send + Sync {
    /// Submit a group creation
    fn add_group(&self, descriptor: GroupDescriptor);

    /// Submit a group deletion
    fn remove_group(&self, device_id: &DeviceId, key: GroupKey, app_id: &AppId);

    /// Append buckets to an existing group
    fn add_buckets_to_group(
        &self,
        device_id: &DeviceId,
        key: GroupKey,
        buckets: Vec<GroupBucket>,
        app_id: &AppId,
    );

    /// Remove buckets from an existing group
    fn remove_buckets_from_group(
        &self,
        device_id: &DeviceId,
        key: GroupKey,
        buckets: Vec<GroupBucket>,
        app_id: &AppId,
    );

    /// Look up a group currently present on the device
    fn get_group(&self, device_id: &DeviceId, key: GroupKey) -> Option<Group>;

    /// Register for group events
    fn add_listener(&self, listener: Arc<dyn GroupListener>);
}

/// Source of globally unique indexes
pub trait SequenceGenerator: Send + Sync {
    /// Next value; never repeats
    fn next(&self) -> u64;
}

/// In-process sequence backed by an atomic counter
#[derive(Debug, Default)]
pub struct AtomicSequence {
    counter: AtomicU64,
}

impl AtomicSequence {
    /// Sequence starting at 1
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence whose first value is `start + 1`
    #[inline]
    #[must_use]
    pub fn with_start(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
        }
    }
}

impl SequenceGenerator for AtomicSequence {
    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}
