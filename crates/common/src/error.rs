//! Common error types for harness components.

use thiserror::Error;

/// Errors raised while rendering configuration into a launch environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    /// Two fragments rendered the same environment variable
    #[error("Duplicate launch environment key: {key}")]
    DuplicateKey {
        /// The colliding variable name
        key: String,
    },

    /// A prefix or section name that cannot form a valid variable name
    #[error("Invalid environment prefix: {0:?}")]
    InvalidPrefix(String),
}

/// Result type alias using `EnvError`
pub type Result<T> = std::result::Result<T, EnvError>;
