//! Error types for the IPC and service layers.

/// Errors produced by `Ipc` and `ServiceApi`.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// An IPC channel was used before anyone listened on it.
    #[error("channel \"{channel}\" does not exist in namespace \"{namespace}\"")]
    ChannelNotEstablished { channel: String, namespace: String },

    /// Malformed arguments at the call or define boundary.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The callee failed. Only its message survives the trip.
    #[error("error calling function {function}: {message}")]
    Remote { function: String, message: String },

    /// The response channel went away before a matching response arrived.
    #[error("channel \"{channel}\" closed before a response arrived")]
    ChannelClosed { channel: String },

    /// The underlying registry failed.
    #[error(transparent)]
    Registry(#[from] openv_registry::Error),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation {
            message: message.into(),
        }
    }

    pub fn not_established(channel: &str, namespace: &str) -> Self {
        ServiceError::ChannelNotEstablished {
            channel: channel.to_string(),
            namespace: namespace.to_string(),
        }
    }

    pub fn is_not_established(&self) -> bool {
        matches!(self, ServiceError::ChannelNotEstablished { .. })
    }

    /// True for a registry `NotFound`, which teardown paths tolerate.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::Registry(e) if e.is_not_found())
    }
}

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use openv_registry::key;

    #[test]
    fn remote_error_keeps_only_the_message() {
        let e = ServiceError::Remote {
            function: "double".into(),
            message: "boom".into(),
        };
        assert_eq!(e.to_string(), "error calling function double: boom");
    }

    #[test]
    fn registry_not_found_is_recognised() {
        let e = ServiceError::from(openv_registry::Error::not_found(&key!("a")));
        assert!(e.is_not_found());
        assert!(!ServiceError::validation("x").is_not_found());
        assert!(ServiceError::not_established("c", "ns").is_not_established());
    }
}
