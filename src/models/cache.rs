//! Memoized train-time decompositions
use crate::linalg::{Diagonalization, KroneckerProduct, KroneckerSolver};
use log::debug;
use nalgebra::DVector;
use std::collections::HashMap;

/// Names of the cached train-time quantities
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// `K(X, X) ⊗ Ktt` on the transformed training inputs
    TrainFullCovar,
    /// Diagonalization of `K(X, X)`
    DataDataRoots,
    /// Diagonalization of `Ktt`
    TaskRoot,
    /// Eigenbasis or dense solver of `K(X, X) ⊗ Ktt + N`
    TrainSolver,
    /// `(K(X, X) ⊗ Ktt + N)⁻¹ vec(Y - m(X))`
    PredictiveMeanCache,
}

impl CacheKey {
    /// Every key, in the order they are evicted
    pub const ALL: [CacheKey; 5] = [
        CacheKey::DataDataRoots,
        CacheKey::TrainFullCovar,
        CacheKey::TaskRoot,
        CacheKey::TrainSolver,
        CacheKey::PredictiveMeanCache,
    ];
}

#[derive(Clone, Debug)]
pub enum CacheEntry {
    Kronecker(KroneckerProduct),
    Diagonalization(Diagonalization),
    Solver(KroneckerSolver),
    Vector(DVector<f64>),
}

/// Cache map with explicit eviction
#[derive(Clone, Debug, Default)]
pub struct ModelCache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: CacheKey) -> Option<&CacheEntry> {
        self.entries.get(&key)
    }

    pub fn contains(&self, key: CacheKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn insert(&mut self, key: CacheKey, entry: CacheEntry) {
        debug!("cache: populating {:?}", key);
        self.entries.insert(key, entry);
    }

    /// Remove `key`, an absent key is not an error
    pub fn pop(&mut self, key: CacheKey) -> Option<CacheEntry> {
        self.entries.remove(&key)
    }

    /// Remove every key in `keys`, skipping absent ones
    pub fn evict(&mut self, keys: &[CacheKey]) {
        for &key in keys {
            if self.pop(key).is_some() {
                debug!("cache: evicted {:?}", key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn kronecker(&self, key: CacheKey) -> Option<&KroneckerProduct> {
        match self.get(key) {
            Some(CacheEntry::Kronecker(kp)) => Some(kp),
            _ => None,
        }
    }

    pub(crate) fn diagonalization(&self, key: CacheKey) -> Option<&Diagonalization> {
        match self.get(key) {
            Some(CacheEntry::Diagonalization(d)) => Some(d),
            _ => None,
        }
    }

    pub(crate) fn solver(&self, key: CacheKey) -> Option<&KroneckerSolver> {
        match self.get(key) {
            Some(CacheEntry::Solver(s)) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn vector(&self, key: CacheKey) -> Option<&DVector<f64>> {
        match self.get(key) {
            Some(CacheEntry::Vector(v)) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evict_skips_absent_keys() {
        let mut cache = ModelCache::new();
        cache.insert(
            CacheKey::PredictiveMeanCache,
            CacheEntry::Vector(DVector::zeros(2)),
        );
        assert!(cache.contains(CacheKey::PredictiveMeanCache));
        cache.evict(&CacheKey::ALL);
        assert!(cache.is_empty());
        cache.evict(&CacheKey::ALL);
        assert!(cache.pop(CacheKey::TaskRoot).is_none());
    }

    #[test]
    fn typed_getters_check_the_entry_kind() {
        let mut cache = ModelCache::new();
        cache.insert(CacheKey::TaskRoot, CacheEntry::Vector(DVector::zeros(1)));
        assert!(cache.diagonalization(CacheKey::TaskRoot).is_none());
        assert!(cache.vector(CacheKey::TaskRoot).is_some());
        assert_eq!(cache.len(), 1);
    }
}
