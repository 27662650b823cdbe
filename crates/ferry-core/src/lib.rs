//! # Ferry Core
//!
//! Core types for the Ferry bundle forwarding control plane.
//!
//! This crate holds everything the action gateway and the router share:
//! addressing, bundles and their forwarding logs, the link state machine
//! and its contacts, the typed event stream, and the interfaces of the
//! collaborators the control plane drives (convergence layers, the bundle
//! store, the block encoder, timers).
//!
//! ## Key Types
//!
//! - [`Link`]: Named route to a neighbor with a checked state machine
//! - [`Contact`]: Open session bound to exactly one link
//! - [`ForwardingLog`]: Per-bundle history of forwarding attempts
//! - [`BundleEvent`]: Everything that can happen to the control plane
//! - [`EventQueue`]: Ordered queue consumed by a single event loop
//!
//! ## Testing
//!
//! [`MockConvergenceLayer`] and [`ManualTimers`] let the whole control plane
//! run deterministically without a transport or a wall clock.

pub mod bundle;
pub mod contact;
pub mod eid;
pub mod error;
pub mod event;
pub mod fwdlog;
pub mod link;
pub mod mock_clayer;
pub mod route;
pub mod timers;
pub mod traits;

// Re-export main types
pub use bundle::*;
pub use contact::*;
pub use eid::*;
pub use error::*;
pub use event::*;
pub use fwdlog::*;
pub use link::*;
pub use mock_clayer::*;
pub use route::*;
pub use timers::*;
pub use traits::*;
