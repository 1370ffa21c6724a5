//! Error types for the pipeliner
//!
//! Three layers:
//! - [`ObjectiveError`], the coarse outcome reported to applications
//! - [`DecomposeError`], why an objective has no chain shape in this pipeline
//! - [`PipelinerError`], every failure inside the engine, mapped onto the taxonomy

use crate::objective::{NextOp, NextType};
use pipeliner_chain::{CodecError, StoreError};
use pipeliner_group::{GroupKey, IpPrefix, NextId};
use serde::{Deserialize, Serialize};

/// Outcome reported through an objective's context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
pub enum ObjectiveError {
    /// Malformed or inconsistent request
    #[error("bad parameters")]
    BadParams,

    /// Valid request this pipeline cannot realize
    #[error("unsupported")]
    Unsupported,

    /// Referenced group chain does not exist
    #[error("group missing")]
    GroupMissing,

    /// A group of the chain was not confirmed in time, or was rejected
    #[error("group installation failed")]
    GroupInstallationFailed,

    /// A group of the chain was not removed in time
    #[error("group removal failed")]
    GroupRemovalFailed,

    /// Anything else
    #[error("unknown error")]
    Unknown,
}

impl ObjectiveError {
    /// True for failures detected on the device side rather than in the request
    #[inline]
    #[must_use]
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            Self::GroupInstallationFailed | Self::GroupRemovalFailed
        )
    }

    /// Stable lower-case name, used as a report key
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadParams => "bad_params",
            Self::Unsupported => "unsupported",
            Self::GroupMissing => "group_missing",
            Self::GroupInstallationFailed => "group_installation_failed",
            Self::GroupRemovalFailed => "group_removal_failed",
            Self::Unknown => "unknown",
        }
    }
}

/// Reasons an objective cannot be turned into group chains
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecomposeError {
    /// SIMPLE objectives carry exactly one treatment
    #[error("simple objective needs exactly one treatment, got {0}")]
    SimpleBucketCount(usize),

    /// Replicating or hashing objective without buckets
    #[error("{0} objective has no buckets")]
    NoBuckets(NextType),

    /// Neither treatment nor metadata yield an egress VLAN
    #[error("no egress vlan in treatment or metadata")]
    MissingVlan,

    /// Bucket without an output action
    #[error("bucket {bucket} has no output port")]
    MissingOutput {
        /// Bucket index
        bucket: usize,
    },

    /// Broadcast metadata names a unicast destination
    #[error("broadcast destination {0} is not multicast")]
    NotMulticast(IpPrefix),

    /// Bucket pushes an MPLS header without setting a label
    #[error("bucket {bucket} pushes mpls without a label")]
    MissingLabel {
        /// Bucket index
        bucket: usize,
    },

    /// Label stacks deeper than one
    #[error("bucket {bucket} pushes {labels} mpls labels")]
    TooManyLabels {
        /// Bucket index
        bucket: usize,
        /// Labels pushed
        labels: usize,
    },

    /// No chain shape for this objective type
    #[error("{0} objectives are not supported")]
    UnsupportedType(NextType),
}

impl DecomposeError {
    /// Map onto the application-facing taxonomy
    #[must_use]
    pub fn objective_error(&self) -> ObjectiveError {
        match self {
            Self::TooManyLabels { .. } | Self::UnsupportedType(_) => ObjectiveError::Unsupported,
            Self::SimpleBucketCount(_)
            | Self::NoBuckets(_)
            | Self::MissingVlan
            | Self::MissingOutput { .. }
            | Self::NotMulticast(_)
            | Self::MissingLabel { .. } => ObjectiveError::BadParams,
        }
    }
}

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum PipelinerError {
    /// Objective could not be decomposed
    #[error(transparent)]
    Decompose(#[from] DecomposeError),

    /// Chain store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Chain handle could not be assembled
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// ADD for an id that already has a chain or an ADD in flight
    #[error("next objective {0} already exists")]
    Duplicate(NextId),

    /// Edit or removal for an id without a chain
    #[error("no group chain stored for {0}")]
    UnknownNext(NextId),

    /// REMOVE while a removal of the same id is pending
    #[error("removal of {0} already pending")]
    RemovalPending(NextId),

    /// Operation this pipeline does not implement
    #[error("operation {0} is not implemented")]
    UnsupportedOp(NextOp),

    /// Bucket edits or verification on something other than a hashed or broadcast objective
    #[error("bucket edits are not supported for {0} objectives")]
    UnsupportedEdit(NextType),

    /// No stored chain matches the egress port and label of any requested bucket
    #[error("no chain of {0} matches the requested buckets")]
    NoMatchingChain(NextId),

    /// Removing the bucket would leave the root without buckets
    #[error("refusing to remove the last bucket of {0}")]
    LastBucket(NextId),

    /// Group the edit depends on is not on the device
    #[error("group {0} not present on device")]
    GroupMissing(GroupKey),

    /// Invalid engine configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelinerError {
    /// Map onto the application-facing taxonomy
    #[must_use]
    pub fn objective_error(&self) -> ObjectiveError {
        match self {
            Self::Decompose(e) => e.objective_error(),
            Self::Store(StoreError::Corrupt { .. })
            | Self::UnknownNext(_)
            | Self::GroupMissing(_) => ObjectiveError::GroupMissing,
            Self::Store(_) | Self::Codec(_) | Self::InvalidConfig(_) => ObjectiveError::Unknown,
            Self::Duplicate(_)
            | Self::RemovalPending(_)
            | Self::LastBucket(_)
            | Self::NoMatchingChain(_) => ObjectiveError::BadParams,
            Self::UnsupportedOp(_) => ObjectiveError::Unknown,
            Self::UnsupportedEdit(_) => ObjectiveError::Unsupported,
        }
    }
}
