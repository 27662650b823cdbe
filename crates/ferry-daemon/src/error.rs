//! Error types for the daemon

use ferry_core::{ConvergenceLayerError, LinkError, StoreError};
use ferry_routing::RouteError;
use thiserror::Error;

/// Errors that can occur while configuring or driving the daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Link creation or deletion failed
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Route table maintenance failed
    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    /// Bundle store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Convergence layer refused an operation
    #[error("Convergence layer error: {0}")]
    ConvergenceLayer(#[from] ConvergenceLayerError),

    /// Registration id already in use
    #[error("Registration {0} already exists")]
    DuplicateRegistration(u32),

    /// No tokio runtime available for timers
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
