use crate::codegen::AddressMode;
use rustc_hash::FxHashMap;
use std::sync::{Arc, RwLock};

/// Cache key: (structural kernel name, addressing mode).
pub type CacheKey = (String, AddressMode);

/// Compiled-kernel-object cache.
///
/// Readers never wait on a concurrent miss's compilation: lookups take the
/// read lock only, and a miss compiles outside the lock entirely. Two racing
/// misses for the same key both complete, but only the first insertion's
/// object stays resident; the loser's object is dropped and the resident one
/// handed back.
pub struct KernelCache<K> {
    map: RwLock<FxHashMap<CacheKey, Arc<K>>>,
}

impl<K> Default for KernelCache<K> {
    fn default() -> Self {
        Self {
            map: RwLock::new(FxHashMap::default()),
        }
    }
}

impl<K> KernelCache<K> {
    pub fn get(&self, key: &CacheKey) -> Option<Arc<K>> {
        self.map.read().unwrap().get(key).cloned()
    }

    /// Insert-or-keep-existing: returns the object now resident under `key`.
    pub fn insert_or_keep(&self, key: CacheKey, kernel: K) -> Arc<K> {
        self.map
            .write()
            .unwrap()
            .entry(key)
            .or_insert_with(|| Arc::new(kernel))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
