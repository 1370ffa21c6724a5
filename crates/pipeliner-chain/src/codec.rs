//! Chain handle blob format
//!
//! Handles persist as a JSON envelope:
//!
//! ```json
//! {"format":"pipeliner.chain-handle","version":1,"chains":[[1879048193,536870914,655363]]}
//! ```
//!
//! Keys are raw `u32` values, each inner list root first.

use crate::chain::{Chain, ChainHandle};
use pipeliner_group::GroupKey;
use serde::{Deserialize, Serialize};

/// Format tag written into every blob
pub const HANDLE_FORMAT: &str = "pipeliner.chain-handle";

/// Current blob version
pub const HANDLE_VERSION: u32 = 1;

/// Errors raised encoding, decoding or assembling a chain handle
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Not JSON, or JSON of the wrong shape
    #[error("malformed chain handle: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Blob written by something else
    #[error("unknown handle format: {0}")]
    UnknownFormat(String),

    /// Blob written by a newer or older layout
    #[error("unsupported handle version: {0}")]
    UnsupportedVersion(u32),

    /// Handle without chains
    #[error("chain handle has no chains")]
    NoChains,

    /// Chain without keys
    #[error("chain {index} is empty")]
    EmptyChain {
        /// Position of the offending chain
        index: usize,
    },

    /// Chains disagree on the root
    #[error("chain root mismatch: expected {expected}, found {found}")]
    RootMismatch {
        /// Root of the first chain
        expected: GroupKey,
        /// Conflicting root
        found: GroupKey,
    },
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    format: String,
    version: u32,
    chains: Vec<Vec<u32>>,
}

impl ChainHandle {
    /// Serialize to the versioned blob format
    ///
    /// # Errors
    /// Returns `CodecError::Malformed` if serialization fails
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let envelope = Envelope {
            format: HANDLE_FORMAT.to_string(),
            version: HANDLE_VERSION,
            chains: self
                .chains()
                .iter()
                .map(|chain| chain.keys().iter().map(|k| k.raw()).collect())
                .collect(),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Parse a blob produced by [`ChainHandle::encode`]
    ///
    /// # Errors
    /// Returns a `CodecError` for foreign, future or structurally invalid blobs
    pub fn decode(blob: &[u8]) -> Result<Self, CodecError> {
        let envelope: Envelope = serde_json::from_slice(blob)?;
        if envelope.format != HANDLE_FORMAT {
            return Err(CodecError::UnknownFormat(envelope.format));
        }
        if envelope.version != HANDLE_VERSION {
            return Err(CodecError::UnsupportedVersion(envelope.version));
        }

        let chains = envelope
            .chains
            .into_iter()
            .enumerate()
            .map(|(index, raw)| {
                Chain::from_keys(raw.into_iter().map(GroupKey::from_raw).collect())
                    .ok_or(CodecError::EmptyChain { index })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(chains)
    }
}
