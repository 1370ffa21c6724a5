//! Workload runner

use crate::config::SimConfig;
use crate::device::SimulatedDevice;
use crate::error::SimError;
use crate::report::{PhaseReport, SimReport};
use crate::workload::{plan, PlannedObjective};
use dashmap::DashMap;
use pipeliner_chain::MemoryChainStore;
use pipeliner_core::{GroupPipeliner, NextObjective, NextOp, ObjectiveContext, ObjectiveError};
use pipeliner_group::{AtomicSequence, DeviceId, NextId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Device id used by every simulation
pub const SIM_DEVICE: &str = "of:00000000000000a1";

/// Extra time granted after the TTL before callbacks count as missing
const GRACE: Duration = Duration::from_secs(1);

/// Collects callbacks of one phase
#[derive(Default)]
struct Tally {
    outcomes: DashMap<NextId, Vec<Result<(), ObjectiveError>>>,
    settled: AtomicUsize,
    notify: Notify,
}

impl Tally {
    fn record(&self, id: NextId, outcome: Result<(), ObjectiveError>) {
        let first = {
            let mut entry = self.outcomes.entry(id).or_default();
            entry.push(outcome);
            entry.len() == 1
        };
        if first {
            self.settled.fetch_add(1, Ordering::AcqRel);
        }
        self.notify.notify_one();
    }

    async fn wait_for(&self, expected: usize, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.settled.load(Ordering::Acquire) < expected {
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                warn!(
                    settled = self.settled.load(Ordering::Acquire),
                    expected, "callbacks still missing at deadline"
                );
                return;
            }
        }
    }

    fn succeeded(&self, id: NextId) -> bool {
        self.outcomes
            .get(&id)
            .is_some_and(|outcomes| outcomes.first() == Some(&Ok(())))
    }

    fn report(&self, submitted: &[&PlannedObjective]) -> PhaseReport {
        let mut report = PhaseReport {
            submitted: submitted.len(),
            ..PhaseReport::default()
        };
        let mut failed: BTreeMap<String, usize> = BTreeMap::new();
        for planned in submitted {
            let Some(outcomes) = self.outcomes.get(&planned.id) else {
                report.missing_callbacks.push(planned.id);
                continue;
            };
            if outcomes.len() > 1 {
                report.duplicate_callbacks.push(planned.id);
            }
            match outcomes.first() {
                Some(Ok(())) => report.succeeded += 1,
                Some(Err(error)) => *failed.entry(error.as_str().to_string()).or_default() += 1,
                None => report.missing_callbacks.push(planned.id),
            }
        }
        report.failed = failed;
        report
    }
}

impl ObjectiveContext for Tally {
    fn on_success(&self, objective: &NextObjective) {
        self.record(objective.id(), Ok(()));
    }

    fn on_error(&self, objective: &NextObjective, error: ObjectiveError) {
        self.record(objective.id(), Err(error));
    }
}

/// Install the generated workload, remove part of it, and report
///
/// # Errors
/// Returns `SimError` if the configuration is invalid or no Tokio runtime is running
pub async fn run(config: &SimConfig) -> Result<SimReport, SimError> {
    config.validate()?;
    let started = Instant::now();
    let device_id = DeviceId::new(SIM_DEVICE);
    let seed = config.workload.seed;

    let device = SimulatedDevice::new(device_id.clone(), config.device.clone(), seed)?;
    let pipeliner = GroupPipeliner::try_new(
        device_id,
        config.pipeliner.clone(),
        Arc::new(device.clone()),
        Arc::new(MemoryChainStore::new()),
        Arc::new(AtomicSequence::new()),
    )?;
    pipeliner.spawn_checker();

    let deadline = config.pipeliner.pending_ttl
        + config.pipeliner.poll_interval * 2
        + Duration::from_millis(config.device.latency_ms + config.device.jitter_ms)
        + GRACE;

    let planned = plan(&config.workload);
    info!(objectives = planned.len(), seed, "installing workload");
    let installs = Arc::new(Tally::default());
    for objective in &planned {
        pipeliner.next(objective.build(NextOp::Add, installs.clone()));
    }
    installs.wait_for(planned.len(), deadline).await;
    let submitted: Vec<&PlannedObjective> = planned.iter().collect();
    let install = installs.report(&submitted);

    let mut rng = StdRng::seed_from_u64(seed.rotate_left(32));
    let removing: Vec<&PlannedObjective> = planned
        .iter()
        .filter(|objective| installs.succeeded(objective.id))
        .filter(|_| rng.random_bool(config.workload.remove_ratio))
        .collect();
    info!(objectives = removing.len(), "removing part of the workload");
    let removals = Arc::new(Tally::default());
    for objective in &removing {
        pipeliner.next(objective.build(NextOp::Remove, removals.clone()));
    }
    removals.wait_for(removing.len(), deadline).await;
    let removal = removals.report(&removing);

    pipeliner.shutdown();
    let report = SimReport {
        seed,
        install,
        removal,
        ordering_violations: device.violations(),
        device: device.stats(),
        engine: pipeliner.stats(),
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    };
    info!(passed = report.passed(), elapsed_ms = report.elapsed_ms, "simulation finished");
    Ok(report)
}
