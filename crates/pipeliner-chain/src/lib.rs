//! Pipeliner Chain - group chains and their bookkeeping
//!
//! Provides:
//! - [`Chain`] and [`ChainHandle`], the ordered group keys an objective compiles to
//! - A self-describing, versioned blob encoding for handles
//! - [`ChainStore`] persistence behind a [`ChainStoreAdapter`]
//! - [`DependencyTracker`], the concurrent "create parent once children exist" map

#![warn(unreachable_pub)]

pub mod chain;
pub mod codec;
pub mod store;
pub mod tracker;

pub use chain::{Chain, ChainHandle};
pub use codec::{CodecError, HANDLE_FORMAT, HANDLE_VERSION};
pub use store::{ChainStore, ChainStoreAdapter, MemoryChainStore, StoreError};
pub use tracker::{ChainElem, DependencyTracker};
