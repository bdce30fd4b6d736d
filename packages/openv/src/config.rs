//! Kernel configuration.

use openv_service::{
    IpcOptions, ServiceOptions, DEFAULT_BUFFER_LENGTH, DEFAULT_IPC_ROOT, DEFAULT_NAMESPACE,
    DEFAULT_SERVICE_ROOT,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings a kernel boots with.
///
/// Every field has a default, so a config file only needs the fields it
/// changes:
///
/// ```json
/// {"defaultNamespace": "shell", "bufferLength": 32}
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KernelConfig {
    /// Root under which bare IPC channels live.
    pub ipc_root: String,
    /// Root under which service functions live.
    pub service_root: String,
    /// Namespace for functions defined without a more specific one.
    pub default_namespace: String,
    /// Queue length for channels created through the kernel.
    pub buffer_length: u64,
    /// Remove every function in the default namespace at boot.
    pub clear_on_boot: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            ipc_root: DEFAULT_IPC_ROOT.to_string(),
            service_root: DEFAULT_SERVICE_ROOT.to_string(),
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            buffer_length: DEFAULT_BUFFER_LENGTH,
            clear_on_boot: true,
        }
    }
}

impl KernelConfig {
    /// Parse a config from JSON, filling absent fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn ipc_options(&self) -> IpcOptions {
        IpcOptions::default()
            .with_root(self.ipc_root.clone())
            .with_buffer_length(self.buffer_length)
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions::default()
            .with_root(self.service_root.clone())
            .with_buffer_length(self.buffer_length)
    }
}
