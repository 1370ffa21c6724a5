//! Chains of group keys
//!
//! A [`Chain`] lists group keys from the root (the group flow rules point
//! at) down to the leaf (the group created first). A [`ChainHandle`]
//! bundles every chain of one objective; all of them share the root.

use crate::codec::CodecError;
use pipeliner_group::GroupKey;
use std::collections::HashSet;

/// Root-first list of group keys, never empty
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chain {
    keys: Vec<GroupKey>,
}

impl Chain {
    /// Chain consisting of its root only
    #[inline]
    #[must_use]
    pub fn new(root: GroupKey) -> Self {
        Self { keys: vec![root] }
    }

    /// Extend the chain one level towards the leaf
    #[inline]
    #[must_use]
    pub fn then(mut self, child: GroupKey) -> Self {
        self.keys.push(child);
        self
    }

    /// Build from root-first keys; `None` if `keys` is empty
    #[must_use]
    pub fn from_keys(keys: Vec<GroupKey>) -> Option<Self> {
        if keys.is_empty() {
            None
        } else {
            Some(Self { keys })
        }
    }

    /// Group consumed by flow rules
    #[inline]
    #[must_use]
    pub fn root(&self) -> GroupKey {
        self.keys[0]
    }

    /// Group created first
    #[inline]
    #[must_use]
    pub fn leaf(&self) -> GroupKey {
        self.keys[self.keys.len() - 1]
    }

    /// Keys root first
    #[inline]
    #[must_use]
    pub fn keys(&self) -> &[GroupKey] {
        &self.keys
    }

    /// Number of levels
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.keys.len()
    }

    /// Key right below the root, if the chain has more than one level
    #[inline]
    #[must_use]
    pub fn below_root(&self) -> Option<GroupKey> {
        self.keys.get(1).copied()
    }
}

/// Every chain of one objective
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHandle {
    chains: Vec<Chain>,
}

impl ChainHandle {
    /// Assemble a handle
    ///
    /// # Errors
    /// Returns `CodecError::NoChains` for an empty list and
    /// `CodecError::RootMismatch` if the chains disagree on their root
    pub fn new(chains: Vec<Chain>) -> Result<Self, CodecError> {
        let first = chains.first().ok_or(CodecError::NoChains)?.root();
        if let Some(other) = chains.iter().find(|c| c.root() != first) {
            return Err(CodecError::RootMismatch {
                expected: first,
                found: other.root(),
            });
        }
        Ok(Self { chains })
    }

    /// Shared root key
    #[inline]
    #[must_use]
    pub fn root(&self) -> GroupKey {
        self.chains[0].root()
    }

    /// All chains
    #[inline]
    #[must_use]
    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    /// Number of chains, one per bucket of the root
    #[inline]
    #[must_use]
    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Handle with one more chain
    ///
    /// # Errors
    /// Returns `CodecError::RootMismatch` if `chain` has a different root
    pub fn with_chain(&self, chain: Chain) -> Result<Self, CodecError> {
        let mut chains = self.chains.clone();
        chains.push(chain);
        Self::new(chains)
    }

    /// Handle without the chains at `indices`
    ///
    /// Returns `None` if an index is out of range or nothing would be left.
    #[must_use]
    pub fn without_chains(&self, indices: &[usize]) -> Option<Self> {
        if indices.iter().any(|index| *index >= self.chains.len()) {
            return None;
        }
        let chains: Vec<Chain> = self
            .chains
            .iter()
            .enumerate()
            .filter(|(index, _)| !indices.contains(index))
            .map(|(_, chain)| chain.clone())
            .collect();
        if chains.is_empty() {
            return None;
        }
        Some(Self { chains })
    }

    /// Every distinct key, ordered level by level from the root down
    ///
    /// Removing groups in this order never deletes a group another
    /// remaining group still points at.
    #[must_use]
    pub fn distinct_keys(&self) -> Vec<GroupKey> {
        let max_depth = self.chains.iter().map(Chain::depth).max().unwrap_or(0);
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for level in 0..max_depth {
            for chain in &self.chains {
                if let Some(&key) = chain.keys().get(level) {
                    if seen.insert(key) {
                        ordered.push(key);
                    }
                }
            }
        }
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: u32) -> GroupKey {
        GroupKey::from_raw(raw)
    }

    #[test]
    fn chain_accessors() {
        let chain = Chain::new(key(1)).then(key(2)).then(key(3));
        assert_eq!(chain.root(), key(1));
        assert_eq!(chain.leaf(), key(3));
        assert_eq!(chain.below_root(), Some(key(2)));
        assert_eq!(chain.depth(), 3);

        let single = Chain::new(key(9));
        assert_eq!(single.root(), single.leaf());
        assert_eq!(single.below_root(), None);
        assert!(Chain::from_keys(vec![]).is_none());
    }

    #[test]
    fn handle_rejects_mixed_roots() {
        let a = Chain::new(key(1)).then(key(2));
        let b = Chain::new(key(7)).then(key(3));
        assert!(matches!(
            ChainHandle::new(vec![a, b]),
            Err(CodecError::RootMismatch { .. })
        ));
        assert!(matches!(ChainHandle::new(vec![]), Err(CodecError::NoChains)));
    }

    #[test]
    fn distinct_keys_root_first_without_duplicates() {
        let handle = ChainHandle::new(vec![
            Chain::new(key(1)).then(key(2)),
            Chain::new(key(1)).then(key(3)),
        ])
        .unwrap();
        assert_eq!(handle.distinct_keys(), vec![key(1), key(2), key(3)]);
    }

    #[test]
    fn without_chains_keeps_at_least_one() {
        let handle = ChainHandle::new(vec![
            Chain::new(key(1)).then(key(2)),
            Chain::new(key(1)).then(key(3)),
            Chain::new(key(1)).then(key(4)),
        ])
        .unwrap();
        let smaller = handle.without_chains(&[0, 2]).unwrap();
        assert_eq!(smaller.chain_count(), 1);
        assert_eq!(smaller.chains()[0].leaf(), key(3));
        assert!(smaller.without_chains(&[0]).is_none());
        assert!(handle.without_chains(&[5]).is_none());
        assert_eq!(handle.without_chains(&[]), Some(handle.clone()));
    }

    #[test]
    fn with_chain_appends() {
        let handle = ChainHandle::new(vec![Chain::new(key(1)).then(key(2))]).unwrap();
        let bigger = handle.with_chain(Chain::new(key(1)).then(key(4))).unwrap();
        assert_eq!(bigger.chain_count(), 2);
        assert!(handle.with_chain(Chain::new(key(5))).is_err());
    }
}
