//! Error types for kernel composition.

use thiserror::Error;

/// Errors raised while booting a kernel or installing APIs into it.
#[derive(Debug, Error)]
pub enum KernelError {
    /// An API of the same type is already installed.
    #[error("API {name} is already installed")]
    AlreadyInstalled { name: &'static str },

    /// The kernel configuration could not be parsed.
    #[error("invalid kernel config: {message}")]
    Config { message: String },

    #[error(transparent)]
    Service(#[from] openv_service::ServiceError),

    #[error(transparent)]
    Registry(#[from] openv_registry::Error),
}

pub type Result<T> = std::result::Result<T, KernelError>;

impl From<serde_json::Error> for KernelError {
    fn from(e: serde_json::Error) -> Self {
        KernelError::Config {
            message: e.to_string(),
        }
    }
}
