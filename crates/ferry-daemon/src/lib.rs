//! # Ferry Daemon
//!
//! The control-plane context for a Ferry node.
//!
//! [`Daemon`] ties together the link registry, the router, the action
//! gateway, the bundle store and the timers, and consumes the event queue
//! one event at a time. Convergence layers, timers and the console only
//! interact with it by posting events.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferry_daemon::{Daemon, DaemonConfig};
//!
//! let mut daemon = Daemon::in_memory(DaemonConfig::default())?;
//! let mut notifications = daemon.subscribe();
//!
//! daemon.contact_manager().create_link(
//!     "peer", LinkType::OnDemand, clayer, "10.0.0.2:4556", peer_eid, LinkParams::default(),
//! )?;
//! daemon.run().await;
//! ```

pub mod config;
pub mod contact_manager;
pub mod daemon;
pub mod error;
pub mod registration;
pub mod timers;

// Re-export main types
pub use config::{ConfigWarning, DaemonConfig};
pub use contact_manager::ContactManager;
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use registration::{Registration, RegistrationTable};
pub use timers::TokioTimers;
