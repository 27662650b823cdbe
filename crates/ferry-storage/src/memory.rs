//! In-memory bundle store

use dashmap::DashMap;
use ferry_core::{BundleId, BundleRef, BundleStore, StoreError};
use tracing::trace;

/// In-memory implementation of `BundleStore`
///
/// Uses `DashMap` keyed by the 32-bit bundle id. Suitable for testing and
/// simulation; nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryBundleStore {
    bundles: DashMap<u32, BundleRef>,
    /// Maximum number of bundles, 0 for unlimited
    capacity: usize,
}

impl InMemoryBundleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that refuses adds beyond `capacity` bundles
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bundles: DashMap::new(),
            capacity,
        }
    }

    pub fn contains(&self, id: BundleId) -> bool {
        self.bundles.contains_key(&id.0)
    }

    /// Highest stored id, used to seed the id allocator after a restart
    pub fn max_id(&self) -> Option<BundleId> {
        self.bundles.iter().map(|e| *e.key()).max().map(BundleId)
    }
}

impl BundleStore for InMemoryBundleStore {
    fn add(&self, bundle: &BundleRef) -> Result<(), StoreError> {
        let id = bundle.id().0;

        if self.capacity != 0 && self.bundles.len() >= self.capacity {
            return Err(StoreError::CapacityExceeded);
        }
        if self.bundles.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }

        trace!(bundle_id = id, "storing bundle");
        self.bundles.insert(id, bundle.clone());
        Ok(())
    }

    fn get(&self, id: BundleId) -> Result<Option<BundleRef>, StoreError> {
        Ok(self.bundles.get(&id.0).map(|e| e.value().clone()))
    }

    fn update(&self, bundle: &BundleRef) -> Result<(), StoreError> {
        let id = bundle.id().0;
        match self.bundles.get_mut(&id) {
            Some(mut entry) => {
                trace!(bundle_id = id, "updating stored bundle");
                *entry.value_mut() = bundle.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(id)),
        }
    }

    fn del(&self, id: BundleId) -> Result<(), StoreError> {
        trace!(bundle_id = id.0, "removing stored bundle");
        self.bundles
            .remove(&id.0)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id.0))
    }

    fn bundles(&self) -> Result<Vec<BundleRef>, StoreError> {
        let mut all: Vec<BundleRef> = self.bundles.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|b| b.id());
        Ok(all)
    }

    fn len(&self) -> usize {
        self.bundles.len()
    }
}
