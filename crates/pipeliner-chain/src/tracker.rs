//! Dependency tracking between groups
//!
//! Maps a not-yet-confirmed child [`GroupKey`] to every pending parent
//! ([`ChainElem`]) that waits on it. A parent waiting on N distinct
//! children is registered under each of them with a counter of N.
//!
//! Guarantees:
//! - Registration merges into an existing entry atomically
//! - `resolve` removes the entry before counting down, so a key is consumed once
//! - An element becomes ready exactly once, however many times its children confirm

use dashmap::DashMap;
use pipeliner_group::{GroupDescriptor, GroupKey};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pending parent group
///
/// `O` identifies the objective the element belongs to.
#[derive(Debug)]
pub struct ChainElem<O> {
    descriptor: GroupDescriptor,
    waiting_on: AtomicUsize,
    fired: AtomicBool,
    bucket_edit: bool,
    owner: O,
    registered_at: Instant,
}

impl<O> ChainElem<O> {
    /// Parent that becomes actionable once `waiting_on` children confirm
    #[must_use]
    pub fn new(descriptor: GroupDescriptor, waiting_on: usize, bucket_edit: bool, owner: O) -> Self {
        Self {
            descriptor,
            waiting_on: AtomicUsize::new(waiting_on),
            fired: AtomicBool::new(false),
            bucket_edit,
            owner,
            registered_at: Instant::now(),
        }
    }

    /// Group to create (or, for bucket edits, the group to extend)
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &GroupDescriptor {
        &self.descriptor
    }

    /// Key of the pending group
    #[inline]
    #[must_use]
    pub fn key(&self) -> GroupKey {
        self.descriptor.key
    }

    /// Children still unconfirmed
    #[inline]
    #[must_use]
    pub fn waiting_on(&self) -> usize {
        self.waiting_on.load(Ordering::Acquire)
    }

    /// True when firing adds buckets to an existing group instead of creating one
    #[inline]
    #[must_use]
    pub fn is_bucket_edit(&self) -> bool {
        self.bucket_edit
    }

    /// Owning objective
    #[inline]
    #[must_use]
    pub fn owner(&self) -> &O {
        &self.owner
    }

    /// True once the element was handed out as ready
    #[inline]
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Time since registration
    #[inline]
    #[must_use]
    pub fn age(&self) -> Duration {
        self.registered_at.elapsed()
    }

    /// Decrement; true if this call took the counter to zero
    fn count_down(&self) -> bool {
        self.waiting_on
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok_and(|previous| previous == 1)
    }

    /// One-shot transition to fired
    fn try_fire(&self) -> bool {
        self.fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Concurrent multi-map from child key to waiting parents
#[derive(Debug)]
pub struct DependencyTracker<O> {
    pending: DashMap<GroupKey, Vec<Arc<ChainElem<O>>>>,
}

impl<O> Default for DependencyTracker<O> {
    fn default() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }
}

impl<O> DependencyTracker<O> {
    /// Create empty tracker
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `parent` waits on `child`
    ///
    /// Registering the same element twice under one key is a no-op.
    pub fn register(&self, child: GroupKey, parent: Arc<ChainElem<O>>) {
        let mut waiting = self.pending.entry(child).or_default();
        if !waiting.iter().any(|elem| Arc::ptr_eq(elem, &parent)) {
            waiting.push(parent);
        }
    }

    /// Consume a child confirmation
    ///
    /// Returns the parents that became ready because of it. Each element is
    /// returned at most once over its lifetime.
    #[must_use]
    pub fn resolve(&self, child: GroupKey) -> Vec<Arc<ChainElem<O>>> {
        let Some((_, waiting)) = self.pending.remove(&child) else {
            return Vec::new();
        };
        waiting
            .into_iter()
            .filter(|elem| elem.count_down() && elem.try_fire())
            .collect()
    }

    /// Remove the entry for a child that will never confirm
    #[must_use]
    pub fn take(&self, child: GroupKey) -> Vec<Arc<ChainElem<O>>> {
        self.pending
            .remove(&child)
            .map(|(_, waiting)| waiting)
            .unwrap_or_default()
    }

    /// Drop every element whose owner matches; returns how many registrations went away
    pub fn purge(&self, mut matches: impl FnMut(&O) -> bool) -> usize {
        let mut purged = 0;
        self.pending.retain(|_, waiting| {
            let before = waiting.len();
            waiting.retain(|elem| !matches(elem.owner()));
            purged += before - waiting.len();
            !waiting.is_empty()
        });
        purged
    }

    /// True if anything waits on `child`
    #[inline]
    #[must_use]
    pub fn is_tracked(&self, child: GroupKey) -> bool {
        self.pending.contains_key(&child)
    }

    /// Every child key currently awaited
    #[must_use]
    pub fn keys(&self) -> Vec<GroupKey> {
        self.pending.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of awaited child keys
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is awaited
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
