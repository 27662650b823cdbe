//! # Ferry Storage
//!
//! Bundle store backends for the Ferry control plane.
//!
//! - **InMemoryBundleStore**: `DashMap`-backed store for tests and simulation,
//!   with an optional capacity limit
//! - **FaultyBundleStore**: wrapper that fails selected operations on demand,
//!   used to exercise the store-failure paths of the action gateway
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferry_core::{Bundle, BundleId, BundleStore, EndpointId};
//! use ferry_storage::InMemoryBundleStore;
//!
//! let store = InMemoryBundleStore::new();
//! let bundle = Bundle::new(BundleId(1), src, dst).into_ref();
//! store.add(&bundle)?;
//! assert_eq!(store.len(), 1);
//! ```

pub mod faulty;
pub mod memory;

pub use faulty::{FaultyBundleStore, StoreOp};
pub use memory::InMemoryBundleStore;

// Re-export the store trait for convenience
pub use ferry_core::{BundleStore, StoreError};
