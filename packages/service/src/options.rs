//! Options for IPC channels and service functions.

use serde::{Deserialize, Serialize};

/// Default root for IPC channel keys.
pub const DEFAULT_IPC_ROOT: &str = "party.openv.ipc.channel";

/// Default root for service function channels.
pub const DEFAULT_SERVICE_ROOT: &str = "party.openv.service.function";

/// Namespace used when the caller has no better partition.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Queue length past which an IPC channel drops all but its newest message.
pub const DEFAULT_BUFFER_LENGTH: u64 = 10;

/// Where an IPC channel lives and how long its queue may grow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IpcOptions {
    pub root: String,
    pub buffer_length: u64,
}

impl Default for IpcOptions {
    fn default() -> Self {
        Self {
            root: DEFAULT_IPC_ROOT.to_string(),
            buffer_length: DEFAULT_BUFFER_LENGTH,
        }
    }
}

impl IpcOptions {
    pub fn with_buffer_length(mut self, buffer_length: u64) -> Self {
        self.buffer_length = buffer_length;
        self
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }
}

/// Where service functions live. Their IPC channels share the same root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceOptions {
    pub root: String,
    pub buffer_length: u64,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            root: DEFAULT_SERVICE_ROOT.to_string(),
            buffer_length: DEFAULT_BUFFER_LENGTH,
        }
    }
}

impl ServiceOptions {
    pub fn with_buffer_length(mut self, buffer_length: u64) -> Self {
        self.buffer_length = buffer_length;
        self
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// The IPC options for this service's channels.
    pub fn ipc(&self) -> IpcOptions {
        IpcOptions {
            root: self.root.clone(),
            buffer_length: self.buffer_length,
        }
    }
}
