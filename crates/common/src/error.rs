//! Ambient error type for configuration and I/O failures that sit
//! outside the protocol/engine error taxonomy (e.g. loading the CLI's
//! config file, setting up logging).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
