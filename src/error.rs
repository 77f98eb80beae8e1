//! Crate-wide error type

use thiserror::Error;

/// Errors raised by model construction, training, and checkpoint I/O
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value (unknown optimizer, activation, ...)
    #[error("configuration error: {0}")]
    Config(String),

    /// Shape arithmetic violation at model construction time
    #[error("shape error: {0}")]
    Shape(String),

    /// Checkpoint (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A trial thread aborted
    #[error("trial error: {0}")]
    Trial(String),
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;
