//! Confirmation sources
//!
//! Both hold a weak reference, so neither keeps a dropped pipeliner alive.

use crate::pipeliner::Inner;
use pipeliner_group::{GroupEvent, GroupEventKind, GroupListener};
use std::sync::Weak;
use tracing::trace;

/// Feeds group events of the managed device into the dispatcher
pub(crate) struct GroupEventListener {
    inner: Weak<Inner>,
}

impl GroupEventListener {
    pub(crate) fn new(inner: Weak<Inner>) -> Self {
        Self { inner }
    }
}

impl GroupListener for GroupEventListener {
    fn event(&self, event: &GroupEvent) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if event.device_id != inner.device_id {
            return;
        }
        trace!(kind = ?event.kind, key = %event.key, group = ?event.id, "group event");
        match event.kind {
            GroupEventKind::Added => inner.process_added(event.key),
            GroupEventKind::Removed => inner.process_removed(event.key),
            GroupEventKind::AddFailed => inner.process_add_failed(event.key),
            GroupEventKind::Updated => inner.process_updated(event.key),
        }
    }
}

/// One pass of the periodic checker
pub(crate) struct GroupChecker {
    inner: Weak<Inner>,
}

impl GroupChecker {
    pub(crate) fn new(inner: Weak<Inner>) -> Self {
        Self { inner }
    }

    /// Poll and sweep; false once the pipeliner is gone
    pub(crate) fn run(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => {
                inner.check_pending();
                true
            }
            None => false,
        }
    }
}
