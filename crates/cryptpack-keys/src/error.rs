//! Error types for the key subsystem.

use thiserror::Error;

/// Result type alias for key operations.
pub type KeyResult<T> = Result<T, KeyError>;

/// Error variants for key resolution and envelope operations.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The vault has no key under the given URI.
    #[error("Key not found: {uri}")]
    NotFound {
        /// The key URI that could not be resolved.
        uri: String,
    },

    /// Token acquisition or token validation failed.
    #[error("Authentication failed: {reason}")]
    AuthFailure {
        /// Description of the credential problem.
        reason: String,
    },

    /// The key service could not be reached or answered with a transient error.
    #[error("Key service unavailable: {reason}")]
    Unavailable {
        /// Description of the error.
        reason: String,
    },

    /// A key with this name already exists. Key creation is not idempotent;
    /// callers must not retry a create blindly.
    #[error("Key already exists: {name}")]
    AlreadyExists {
        /// The duplicate key name.
        name: String,
    },

    /// Wrapping a content key under the KEK failed.
    #[error("Key wrap failed: {0}")]
    WrapFailed(String),

    /// Unwrapping failed: authentication tag mismatch, wrong KEK, or corrupt data.
    #[error("Key unwrap failed: authentication tag mismatch")]
    UnwrapFailed,
}
