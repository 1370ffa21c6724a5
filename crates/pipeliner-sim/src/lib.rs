//! Pipeliner Sim - seeded device simulation
//!
//! Runs a generated workload of next objectives through a
//! [`pipeliner_core::GroupPipeliner`] wired to a [`SimulatedDevice`] with
//! latency, event loss and rejections, then checks that:
//! - every objective got exactly one callback
//! - no group was requested before the groups it points at were installed
//!
//! # Example
//!
//! ```rust,ignore
//! let config = SimConfig::from_toml_str("[device]\nevent_loss = 0.2")?;
//! let report = pipeliner_sim::run(&config).await?;
//! assert!(report.passed());
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod device;
pub mod error;
pub mod report;
pub mod runner;
pub mod workload;

pub use config::{DeviceConfig, LogFormat, LoggingConfig, SimConfig, WorkloadConfig};
pub use device::{DeviceStats, OrderingViolation, SimulatedDevice};
pub use error::SimError;
pub use report::{PhaseReport, SimReport};
pub use runner::{run, SIM_DEVICE};
pub use workload::{plan, PlannedObjective};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
