//! The plan cache.
//!
//! Selected physical plans are cached under the structural digest of the
//! logical tree they were planned from. The cache is bounded and evicts
//! least-recently-used entries.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use super::physical::PhysicalPlan;

/// Default number of cached plans.
const DEFAULT_CAPACITY: usize = 128;

/// A bounded LRU cache of selected physical plans.
pub struct PlanCache {
    cache: Mutex<LruCache<u64, Arc<PhysicalPlan>>>,
}

impl PlanCache {
    /// Create a cache with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1"),
            )),
        }
    }

    /// Look up the plan for a logical-tree digest.
    pub fn get(&self, digest: u64) -> Option<Arc<PhysicalPlan>> {
        self.cache.lock().get(&digest).cloned()
    }

    /// Store the plan selected for a logical-tree digest.
    pub fn put(&self, digest: u64, plan: Arc<PhysicalPlan>) {
        self.cache.lock().put(digest, plan);
    }

    /// Number of cached plans.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached plan.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
