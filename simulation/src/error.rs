//! Simulation errors

use ferry_core::EndpointError;
use ferry_daemon::DaemonError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Node already exists: {0}")]
    DuplicateNode(String),

    #[error("Unknown link: {0}")]
    UnknownLink(String),

    #[error("Network did not settle after {0} rounds")]
    NoQuiescence(usize),

    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("Daemon error: {0}")]
    Daemon(#[from] DaemonError),
}

pub type SimResult<T> = Result<T, SimError>;
