//! Fault-injecting store wrapper

use std::collections::HashSet;
use std::sync::Arc;

use ferry_core::{BundleId, BundleRef, BundleStore, StoreError};
use parking_lot::Mutex;
use tracing::debug;

/// Store operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Add,
    Get,
    Update,
    Del,
}

/// Wraps another store and fails the selected operations with an I/O error
pub struct FaultyBundleStore {
    inner: Arc<dyn BundleStore>,
    failing: Mutex<HashSet<StoreOp>>,
}

impl FaultyBundleStore {
    pub fn new(inner: Arc<dyn BundleStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail(&self, op: StoreOp) {
        debug!(?op, "store fault enabled");
        self.failing.lock().insert(op);
    }

    pub fn heal(&self, op: StoreOp) {
        self.failing.lock().remove(&op);
    }

    pub fn heal_all(&self) {
        self.failing.lock().clear();
    }

    fn check(&self, op: StoreOp) -> Result<(), StoreError> {
        if self.failing.lock().contains(&op) {
            return Err(StoreError::Io(format!("injected {:?} failure", op)));
        }
        Ok(())
    }
}

impl BundleStore for FaultyBundleStore {
    fn add(&self, bundle: &BundleRef) -> Result<(), StoreError> {
        self.check(StoreOp::Add)?;
        self.inner.add(bundle)
    }

    fn get(&self, id: BundleId) -> Result<Option<BundleRef>, StoreError> {
        self.check(StoreOp::Get)?;
        self.inner.get(id)
    }

    fn update(&self, bundle: &BundleRef) -> Result<(), StoreError> {
        self.check(StoreOp::Update)?;
        self.inner.update(bundle)
    }

    fn del(&self, id: BundleId) -> Result<(), StoreError> {
        self.check(StoreOp::Del)?;
        self.inner.del(id)
    }

    fn bundles(&self) -> Result<Vec<BundleRef>, StoreError> {
        self.inner.bundles()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
