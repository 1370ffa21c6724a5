//! Introspection helpers

use crate::pipeliner::Inner;
use pipeliner_chain::ChainHandle;
use pipeliner_group::Instruction;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Outstanding work of a pipeliner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelinerStats {
    /// Child keys with parents waiting on them
    pub tracked_keys: usize,
    /// Chains and bucket additions not yet confirmed
    pub pending_adds: usize,
    /// Removals not yet confirmed
    pub pending_removals: usize,
    /// Bucket edits the device has not reported yet
    pub pending_updates: usize,
    /// ADDs whose root is not confirmed
    pub in_flight: usize,
    /// Operations queued behind those ADDs
    pub deferred: usize,
}

impl PipelinerStats {
    /// True if nothing is outstanding
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.tracked_keys == 0
            && self.pending_adds == 0
            && self.pending_removals == 0
            && self.pending_updates == 0
            && self.in_flight == 0
    }
}

impl Inner {
    pub(crate) fn stats(&self) -> PipelinerStats {
        PipelinerStats {
            tracked_keys: self.tracker.len(),
            pending_adds: self.pending.iter().count(),
            pending_removals: self.removals.iter().count(),
            pending_updates: self.updates.iter().count(),
            in_flight: self.in_flight.len(),
            deferred: self.in_flight.iter().map(|flight| flight.deferred.len()).sum(),
        }
    }

    /// One line per chain: each group id from the root down, then the egress ports
    pub(crate) fn next_mappings(&self, handle: &ChainHandle) -> Vec<String> {
        handle
            .chains()
            .iter()
            .map(|chain| {
                let mut line = String::new();
                let mut last = None;
                for key in chain.keys() {
                    match self.groups.get_group(&self.device_id, *key) {
                        Some(group) => {
                            let _ = write!(line, "  {} -->", group.id);
                            last = Some(group);
                        }
                        None => line.push_str("  NoGrp -->"),
                    }
                }
                let ports = last
                    .iter()
                    .flat_map(|group| group.buckets.first())
                    .flat_map(|bucket| bucket.treatment.instructions())
                    .filter_map(|instruction| match instruction {
                        Instruction::Output(port) => Some(*port),
                        _ => None,
                    });
                for port in ports {
                    let _ = write!(line, " port:{port}");
                }
                line
            })
            .collect()
    }
}
