//! Error types for the Ferry control plane

use thiserror::Error;

use crate::link::LinkState;

/// Top-level error type for Ferry
#[derive(Debug, Error)]
pub enum FerryError {
    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Contact error: {0}")]
    Contact(#[from] ContactError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Convergence layer error: {0}")]
    ConvergenceLayer(#[from] ConvergenceLayerError),
}

/// Errors related to endpoint identifiers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Invalid endpoint id: {0}")]
    InvalidFormat(String),

    #[error("Endpoint part too long: {len} > {max}")]
    TooLong { len: usize, max: usize },
}

/// Errors raised by the link state machine
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("Illegal link state transition {from} -> {to}")]
    IllegalTransition { from: LinkState, to: LinkState },

    #[error("Link open requested in state {0}, expected AVAILABLE")]
    NotAvailable(LinkState),

    #[error("Link has no contact")]
    NoContact,

    #[error("Link already has a contact")]
    ContactExists,

    #[error("Convergence layer did not release contact state on close")]
    ClInfoNotCleared,

    #[error("Link is deleted")]
    Deleted,

    #[error("Invalid link parameters: {0}")]
    InvalidParams(String),

    #[error("Link already exists: {0}")]
    Duplicate(String),

    #[error("No such link: {0}")]
    NotFound(String),

    #[error("Convergence layer rejected link: {0}")]
    ClRejected(String),
}

/// Errors related to the contact's convergence layer slot
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContactError {
    #[error("Convergence layer info already set on contact")]
    ClInfoAlreadySet,

    #[error("Convergence layer info already cleared on contact")]
    ClInfoAlreadyCleared,
}

/// Errors returned by persistent bundle stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(String),

    #[error("Bundle already stored: {0}")]
    AlreadyExists(u32),

    #[error("Bundle not found: {0}")]
    NotFound(u32),

    #[error("Store capacity exceeded")]
    CapacityExceeded,
}

/// Errors reported by convergence layers
#[derive(Debug, Error)]
pub enum ConvergenceLayerError {
    #[error("Session setup failed: {0}")]
    SessionFailed(String),

    #[error("Invalid link configuration: {0}")]
    InvalidLink(String),

    #[error("Contact has no owning link")]
    OrphanContact,
}

/// Result type alias for Ferry operations
pub type FerryResult<T> = Result<T, FerryError>;
