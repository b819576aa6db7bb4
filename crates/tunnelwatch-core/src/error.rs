//! Error types for `tunnelwatch` core library.

use thiserror::Error;

/// Result type alias using `tunnelwatch` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `tunnelwatch` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be read, parsed or validated.
    #[error("Configuration error: {0}")]
    Config(String),
}
