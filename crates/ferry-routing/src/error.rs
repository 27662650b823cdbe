//! Routing error types

use ferry_core::{EndpointError, EndpointIdPattern};
use thiserror::Error;

/// Errors raised by route table maintenance
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// An identical entry already exists
    #[error("Duplicate route {dest} via {link}")]
    Duplicate { dest: EndpointIdPattern, link: String },

    /// No entry matched a delete request
    #[error("No route {dest} via {link}")]
    NotFound { dest: EndpointIdPattern, link: String },

    /// Route refers to a deleted link
    #[error("Link {0} is deleted")]
    LinkDeleted(String),

    #[error("Invalid route pattern: {0}")]
    InvalidPattern(#[from] EndpointError),
}

/// Result type for routing operations
pub type RouteResult<T> = Result<T, RouteError>;
