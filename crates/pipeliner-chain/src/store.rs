//! Chain handle persistence
//!
//! [`ChainStore`] is the external durable map `next id -> bytes`.
//! [`ChainStoreAdapter`] layers the handle codec on top of it.

use crate::chain::ChainHandle;
use crate::codec::CodecError;
use dashmap::DashMap;
use pipeliner_group::NextId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Errors raised by the chain store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backing store refused the operation
    #[error("chain store unavailable: {0}")]
    Unavailable(String),

    /// Stored blob could not be decoded
    #[error("stored handle for {id} is invalid: {source}")]
    Corrupt {
        /// Objective whose handle is broken
        id: NextId,
        /// Decoding failure
        source: CodecError,
    },

    /// Handle could not be encoded
    #[error("cannot encode handle: {0}")]
    Encode(#[from] CodecError),
}

/// Durable keyed byte store
pub trait ChainStore: Send + Sync {
    /// Read the blob stored for `id`
    ///
    /// # Errors
    /// Returns `StoreError::Unavailable` if the backend cannot be reached
    fn get(&self, id: NextId) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write or overwrite the blob for `id`
    ///
    /// # Errors
    /// Returns `StoreError::Unavailable` if the backend cannot be reached
    fn put(&self, id: NextId, blob: Vec<u8>) -> Result<(), StoreError>;

    /// Delete the blob for `id`, returning it if present
    ///
    /// # Errors
    /// Returns `StoreError::Unavailable` if the backend cannot be reached
    fn remove(&self, id: NextId) -> Result<Option<Vec<u8>>, StoreError>;
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryChainStore {
    blobs: DashMap<NextId, Vec<u8>>,
    unavailable: AtomicBool,
}

impl MemoryChainStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail, or recover
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored blobs
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// True when nothing is stored
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

impl ChainStore for MemoryChainStore {
    fn get(&self, id: NextId) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        Ok(self.blobs.get(&id).map(|blob| blob.value().clone()))
    }

    fn put(&self, id: NextId, blob: Vec<u8>) -> Result<(), StoreError> {
        self.check()?;
        self.blobs.insert(id, blob);
        Ok(())
    }

    fn remove(&self, id: NextId) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        Ok(self.blobs.remove(&id).map(|(_, blob)| blob))
    }
}

/// Typed view of a [`ChainStore`]
#[derive(Clone)]
pub struct ChainStoreAdapter {
    store: Arc<dyn ChainStore>,
}

impl std::fmt::Debug for ChainStoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainStoreAdapter").finish_non_exhaustive()
    }
}

impl ChainStoreAdapter {
    /// Wrap a store
    #[inline]
    #[must_use]
    pub fn new(store: Arc<dyn ChainStore>) -> Self {
        Self { store }
    }

    /// Persist a handle
    ///
    /// # Errors
    /// Returns `StoreError` if encoding or the backend fails
    pub fn put(&self, id: NextId, handle: &ChainHandle) -> Result<(), StoreError> {
        let blob = handle.encode()?;
        if let Err(e) = self.store.put(id, blob) {
            error!(%id, error = %e, "failed to persist chain handle");
            return Err(e);
        }
        debug!(%id, chains = handle.chain_count(), root = %handle.root(), "chain handle stored");
        Ok(())
    }

    /// Read a handle back
    ///
    /// # Errors
    /// Returns `StoreError::Corrupt` for undecodable blobs, or the backend's error
    pub fn get(&self, id: NextId) -> Result<Option<ChainHandle>, StoreError> {
        match self.store.get(id)? {
            Some(blob) => ChainHandle::decode(&blob)
                .map(Some)
                .map_err(|source| StoreError::Corrupt { id, source }),
            None => Ok(None),
        }
    }

    /// Drop a handle
    ///
    /// # Errors
    /// Returns the backend's error
    pub fn remove(&self, id: NextId) -> Result<(), StoreError> {
        if self.store.remove(id)?.is_some() {
            debug!(%id, "chain handle removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use pipeliner_group::GroupKey;

    fn handle() -> ChainHandle {
        ChainHandle::new(vec![Chain::new(GroupKey::from_raw(0x2000_0001))
            .then(GroupKey::from_raw(0x0000_0003))])
        .unwrap()
    }

    #[test]
    fn put_get_remove() {
        let store = Arc::new(MemoryChainStore::new());
        let adapter = ChainStoreAdapter::new(store.clone());
        let id = NextId::new(7);

        assert!(adapter.get(id).unwrap().is_none());
        adapter.put(id, &handle()).unwrap();
        assert_eq!(adapter.get(id).unwrap(), Some(handle()));
        assert_eq!(store.len(), 1);

        adapter.remove(id).unwrap();
        assert!(adapter.get(id).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_blob_is_reported() {
        let store = Arc::new(MemoryChainStore::new());
        store.put(NextId::new(1), b"not json".to_vec()).unwrap();
        let adapter = ChainStoreAdapter::new(store);
        assert!(matches!(
            adapter.get(NextId::new(1)),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn offline_store_fails_writes() {
        let store = Arc::new(MemoryChainStore::new());
        store.set_unavailable(true);
        let adapter = ChainStoreAdapter::new(store.clone());
        assert!(matches!(
            adapter.put(NextId::new(1), &handle()),
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(adapter.put(NextId::new(1), &handle()).is_ok());
    }
}
