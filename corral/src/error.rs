//! Control-plane error types

use thiserror::Error;

/// Errors that can occur during control-plane operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("node id {0} was removed and cannot be reused")]
    NodeRetired(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("backing resource error: {0}")]
    Backing(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error kind as a string for log labeling
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::NodeExists(_) => "node_exists",
            Error::NodeRetired(_) => "node_retired",
            Error::NodeNotFound(_) => "node_not_found",
            Error::Backing(_) => "backing",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
