//! Bounded duplicate-bundle cache

use std::collections::{HashSet, VecDeque};

use ferry_core::{Bundle, BundleFingerprint};

/// Remembers the fingerprints of recently seen bundles
///
/// Oldest fingerprints are evicted first once the cache is full. A zero
/// capacity disables the cache.
#[derive(Debug)]
pub struct DupCache {
    capacity: usize,
    order: VecDeque<BundleFingerprint>,
    seen: HashSet<BundleFingerprint>,
}

impl DupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(4096)),
            seen: HashSet::with_capacity(capacity.min(4096)),
        }
    }

    /// Record the bundle, returning true if it was already seen
    pub fn is_duplicate(&mut self, bundle: &Bundle) -> bool {
        if self.capacity == 0 {
            return false;
        }

        let fingerprint = bundle.fingerprint();
        if self.seen.contains(&fingerprint) {
            return true;
        }

        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.order.push_back(fingerprint.clone());
        self.seen.insert(fingerprint);
        false
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
