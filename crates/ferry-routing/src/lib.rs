//! # Ferry Routing
//!
//! Forwarding decisions for the Ferry control plane.
//!
//! The [`TableBasedRouter`] reacts to control-plane events, matches bundles
//! against its [`RouteTable`] and performs every effect through a
//! [`BundleActions`] gateway. [`DaemonActions`] is the gateway backed by real
//! links and a bundle store; tests and simulations may provide their own.
//!
//! ## Key Types
//!
//! - [`BundleActions`]: The only path from routing to links, convergence layers and storage
//! - [`RouteTable`]: Destination patterns mapped to outgoing links
//! - [`TableBasedRouter`]: Priority-ordered matching with reroute timers
//! - [`RoutingPolicy`]: Strategy hook for route filtering and ordering
//! - [`DupCache`]: Bounded duplicate suppression

pub mod actions;
pub mod config;
pub mod dupcache;
pub mod error;
pub mod policy;
pub mod route_table;
pub mod router;

// Re-export main types
pub use actions::*;
pub use config::*;
pub use dupcache::*;
pub use error::*;
pub use policy::*;
pub use route_table::*;
pub use router::*;
