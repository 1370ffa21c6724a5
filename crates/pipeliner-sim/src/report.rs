//! Simulation outcome

use crate::device::{DeviceStats, OrderingViolation};
use pipeliner_core::PipelinerStats;
use pipeliner_group::NextId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Results of one phase (installs or removals)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    /// Objectives submitted
    pub submitted: usize,
    /// Objectives reported successful
    pub succeeded: usize,
    /// Failures by error name
    pub failed: BTreeMap<String, usize>,
    /// Objectives that received more than one callback
    pub duplicate_callbacks: Vec<NextId>,
    /// Objectives that received no callback before the deadline
    pub missing_callbacks: Vec<NextId>,
}

impl PhaseReport {
    /// Total failures
    #[must_use]
    pub fn failures(&self) -> usize {
        self.failed.values().sum()
    }

    fn is_clean(&self) -> bool {
        self.duplicate_callbacks.is_empty() && self.missing_callbacks.is_empty()
    }
}

/// Final report of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimReport {
    /// Workload and device seed
    pub seed: u64,
    /// ADD phase
    pub install: PhaseReport,
    /// REMOVE phase
    pub removal: PhaseReport,
    /// Parent requests that preceded their children
    pub ordering_violations: Vec<OrderingViolation>,
    /// Device counters
    pub device: DeviceStats,
    /// Engine state after the run
    pub engine: PipelinerStats,
    /// Wall-clock duration
    pub elapsed_ms: u64,
}

impl SimReport {
    /// True if every objective got exactly one callback and no parent preceded a child
    ///
    /// Failed objectives do not fail the run; rejections and timeouts are
    /// legitimate outcomes.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.install.is_clean() && self.removal.is_clean() && self.ordering_violations.is_empty()
    }

    /// Render as text
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "=== Pipeliner Simulation Report ===\n");
        let _ = writeln!(report, "Seed: {}", self.seed);
        let _ = writeln!(report, "Elapsed: {}ms", self.elapsed_ms);
        phase(&mut report, "Install", &self.install);
        phase(&mut report, "Removal", &self.removal);

        let _ = writeln!(report, "\nDevice:");
        let _ = writeln!(report, "  Group adds: {}", self.device.adds);
        let _ = writeln!(report, "  Group removes: {}", self.device.removes);
        let _ = writeln!(report, "  Rejected adds: {}", self.device.rejected);
        let _ = writeln!(report, "  Lost events: {}", self.device.lost_events);
        let _ = writeln!(report, "  Installed groups: {}", self.device.installed);
        let _ = writeln!(report, "  Ordering violations: {}", self.ordering_violations.len());
        for violation in &self.ordering_violations {
            let _ = writeln!(
                report,
                "    {} referenced {} before installation",
                violation.parent, violation.missing
            );
        }

        let _ = writeln!(
            report,
            "\nEngine: tracked={} pending_adds={} pending_removals={} pending_updates={} in_flight={}",
            self.engine.tracked_keys,
            self.engine.pending_adds,
            self.engine.pending_removals,
            self.engine.pending_updates,
            self.engine.in_flight
        );
        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        report
    }

    /// Render as pretty JSON
    ///
    /// # Errors
    /// Returns an error if serialization fails
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn phase(report: &mut String, name: &str, phase: &PhaseReport) {
    let _ = writeln!(report, "\n{name}:");
    let _ = writeln!(report, "  Submitted: {}", phase.submitted);
    let _ = writeln!(report, "  Succeeded: {}", phase.succeeded);
    let _ = writeln!(report, "  Failed: {}", phase.failures());
    for (error, count) in &phase.failed {
        let _ = writeln!(report, "    {error}: {count}");
    }
    if !phase.duplicate_callbacks.is_empty() {
        let _ = writeln!(report, "  Duplicate callbacks: {:?}", phase.duplicate_callbacks);
    }
    if !phase.missing_callbacks.is_empty() {
        let _ = writeln!(report, "  Missing callbacks: {:?}", phase.missing_callbacks);
    }
}
