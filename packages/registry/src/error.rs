//! Error types for the registry layer.

use crate::key::Key;

/// Errors produced by registry implementations.
///
/// `NotFound` is the only kind callers are expected to handle routinely;
/// probing with `has` or swallowing `NotFound` is the usual way to implement
/// "create if absent".
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The key is not present in the registry.
    #[error("key \"{key}\" not found in registry")]
    NotFound { key: String },

    /// A key string could not be parsed.
    #[error("invalid key: {message}")]
    InvalidKey { message: String },

    /// A remote registry answered an operation with `success: false`.
    #[error("{op} of key \"{key}\" was rejected")]
    Rejected { op: String, key: String },

    /// A value could not be converted into the requested type.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// A value could not be produced from a Rust type.
    #[error("encode error: {message}")]
    Encode { message: String },

    /// Generic error with message.
    #[error("{message}")]
    Other { message: String },
}

impl Error {
    /// Create a `NotFound` error for a key.
    pub fn not_found(key: &Key) -> Self {
        Error::NotFound {
            key: key.to_string(),
        }
    }

    /// Create a `Rejected` error for an operation on a key.
    pub fn rejected(op: impl Into<String>, key: &Key) -> Self {
        Error::Rejected {
            op: op.into(),
            key: key.to_string(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Error::Decode {
            message: message.into(),
        }
    }

    /// Create an encode error.
    pub fn encode(message: impl Into<String>) -> Self {
        Error::Encode {
            message: message.into(),
        }
    }

    /// Create a generic error.
    pub fn other(message: impl Into<String>) -> Self {
        Error::Other {
            message: message.into(),
        }
    }

    /// Check whether this is a `NotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;
