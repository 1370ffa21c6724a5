//! Seeded objective generation

use crate::config::WorkloadConfig;
use pipeliner_core::{NextObjective, NextOp, NextType, ObjectiveContext};
use pipeliner_group::{MacAddress, MplsLabel, NextId, PortNumber, Selector, Treatment, VlanId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Ports reserved per objective, so objectives never share a leaf
const PORTS_PER_OBJECTIVE: u64 = 8;

/// One generated objective, replayable for any operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedObjective {
    /// Objective id
    pub id: NextId,
    /// Objective type
    pub kind: NextType,
    /// Buckets
    pub treatments: Vec<Treatment>,
    /// VLAN metadata
    pub meta: Selector,
}

impl PlannedObjective {
    /// Materialize with an operation and a context
    #[must_use]
    pub fn build(&self, op: NextOp, context: Arc<dyn ObjectiveContext>) -> NextObjective {
        NextObjective::builder(self.id, self.kind)
            .with_treatments(self.treatments.iter().cloned())
            .with_meta(self.meta.clone())
            .with_context(context)
            .build(op)
    }
}

/// Generate the objectives of a run; identical for identical configs
#[must_use]
pub fn plan(config: &WorkloadConfig) -> Vec<PlannedObjective> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let meta = VlanId::new(config.vlan)
        .map(|vlan| Selector::builder().match_vlan_id(vlan).build())
        .unwrap_or_default();

    (0..config.objectives)
        .map_while(|index| {
            let id = NextId::new(u32::try_from(index + 1).ok()?);
            let first_port = index * PORTS_PER_OBJECTIVE + 1;
            let kind = match rng.random_range(0..3) {
                0 => NextType::Simple,
                1 => NextType::Broadcast,
                _ => NextType::Hashed,
            };
            let buckets = match kind {
                NextType::Simple => 1,
                _ => rng.random_range(1..=config.max_buckets),
            };
            let treatments = (0..buckets as u64)
                .map(|bucket| {
                    let port = PortNumber::new(first_port + bucket);
                    match kind {
                        NextType::Broadcast => framing(port),
                        NextType::Hashed if rng.random_bool(0.3) => {
                            labelled(port, rng.random_range(16..(1 << 20)))
                        }
                        NextType::Hashed => routed(port),
                        _ if rng.random_bool(0.5) => routed(port),
                        _ => framing(port),
                    }
                })
                .collect();
            Some(PlannedObjective {
                id,
                kind,
                treatments,
                meta: meta.clone(),
            })
        })
        .collect()
}

fn next_hop(port: PortNumber) -> MacAddress {
    let b = port.raw().to_be_bytes();
    MacAddress::new([0x02, 0x00, b[4], b[5], b[6], b[7]])
}

fn framing(port: PortNumber) -> Treatment {
    Treatment::builder().output(port).build()
}

fn routed(port: PortNumber) -> Treatment {
    Treatment::builder()
        .set_eth_src(MacAddress::new([0x02, 0, 0, 0, 0, 0x01]))
        .set_eth_dst(next_hop(port))
        .output(port)
        .build()
}

fn labelled(port: PortNumber, label: u32) -> Treatment {
    let builder = Treatment::builder()
        .set_eth_src(MacAddress::new([0x02, 0, 0, 0, 0, 0x01]))
        .set_eth_dst(next_hop(port))
        .push_mpls();
    let builder = match MplsLabel::new(label) {
        Ok(label) => builder.set_mpls_label(label),
        Err(_) => builder,
    };
    builder.output(port).build()
}
