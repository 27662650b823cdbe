//! # Ferry Simulation
//!
//! Runs several Ferry daemons in one process over a simulated convergence
//! layer. Time is driven manually, so scenarios are deterministic.
//!
//! - **Fabric** (`clayer.rs`): shared medium holding bundles in transit and
//!   tracking which node pairs can reach each other
//! - **Network** (`network.rs`): nodes, links, routes and the simulated clock
//! - **Scenarios** (`scenarios.rs`): scripted topologies with a report
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferry_sim::SimNetwork;
//! use ferry_core::{LinkParams, LinkType};
//!
//! let mut net = SimNetwork::new();
//! net.add_node("a")?;
//! net.add_node("b")?;
//! net.register("b", 1, "dtn://b/app")?;
//! net.connect("a", "b", LinkType::AlwaysOn, LinkParams::default())?;
//!
//! net.send("a", "dtn://b/app", &b"hello"[..])?;
//! net.settle()?;
//! assert_eq!(net.node("b")?.stats().delivered.len(), 1);
//! ```

pub mod clayer;
pub mod error;
pub mod network;
pub mod scenarios;

// Re-export main types
pub use clayer::{SimConvergenceLayer, SimFabric, SimSession};
pub use error::{SimError, SimResult};
pub use network::{NodeStats, SimNetwork, SimNode};
pub use scenarios::{NodeReport, ScenarioReport};
