//! Pipeliner Core - OF-DPA next-objective compiler
//!
//! The engine that:
//! - Decomposes next objectives into chains of OF-DPA groups
//! - Installs each chain leaves first, creating a parent only after every
//!   child is confirmed by the device
//! - Stores a handle per objective for later edits and removal
//! - Grows and shrinks hashed chains one bucket at a time
//! - Fails anything the device does not confirm within a TTL
//!
//! # Example
//!
//! ```rust,ignore
//! use pipeliner_core::{GroupPipeliner, NextObjective, NextType, PipelinerConfig};
//!
//! let pipeliner = GroupPipeliner::new(device, PipelinerConfig::default(), groups, store, sequence);
//! pipeliner.spawn_checker();
//!
//! let objective = NextObjective::builder(NextId::new(7), NextType::Hashed)
//!     .with_treatments(buckets)
//!     .with_meta(meta)
//!     .with_context(context)
//!     .add();
//! pipeliner.next(objective);
//! ```

#![warn(unreachable_pub)]

mod bucket;
pub mod config;
pub mod decompose;
pub mod diagnostics;
pub mod error;
mod listener;
pub mod objective;
pub mod pipeliner;

pub use config::PipelinerConfig;
pub use decompose::{BucketAddition, Decomposition, ObjectiveDecomposer, PlannedParent};
pub use diagnostics::PipelinerStats;
pub use error::{DecomposeError, ObjectiveError, PipelinerError};
pub use objective::{NextObjective, NextObjectiveBuilder, NextOp, NextType, ObjectiveContext};
pub use pipeliner::GroupPipeliner;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the pipeliner
    pub use crate::{
        GroupPipeliner, NextObjective, NextOp, NextType, ObjectiveContext, ObjectiveError,
        PipelinerConfig,
    };
    pub use pipeliner_chain::{ChainHandle, ChainStore, MemoryChainStore};
    pub use pipeliner_group::{
        AtomicSequence, DeviceId, GroupService, NextId, PortNumber, Selector, Treatment, VlanId,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
