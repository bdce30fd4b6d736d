//! The kernel: one registry and the APIs installed over it.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use openv_channel::Channel;
use openv_channel_registry::{ChannelRegistry, RegistryServer, ServeHandle};
use openv_registry::Registry;
use openv_service::{Ipc, IpcOptions, ServiceApi, ServiceOptions};

use crate::config::KernelConfig;
use crate::error::{KernelError, Result};

/// An API that can be installed into a kernel.
///
/// APIs are looked up by type, so each type is installed at most once.
pub trait Api: Any + Send + Sync + Sized {
    /// Name used in logs and errors.
    const NAME: &'static str;

    /// Build the API over a kernel's registry.
    fn build(kernel: &Kernel) -> Self;
}

impl Api for Ipc {
    const NAME: &'static str = "ipc";

    fn build(kernel: &Kernel) -> Self {
        Ipc::new(kernel.registry())
    }
}

impl Api for ServiceApi {
    const NAME: &'static str = "service";

    fn build(kernel: &Kernel) -> Self {
        ServiceApi::new(kernel.registry())
    }
}

type ApiBox = Arc<dyn Any + Send + Sync>;

/// Owns a registry and the APIs built on it.
pub struct Kernel {
    registry: Arc<dyn Registry>,
    config: KernelConfig,
    apis: RwLock<HashMap<TypeId, (&'static str, ApiBox)>>,
    ipc: Arc<Ipc>,
    service: Arc<ServiceApi>,
}

impl Kernel {
    /// Boot a kernel over `registry` with the built-in IPC and service APIs
    /// installed.
    pub async fn boot(registry: Arc<dyn Registry>, config: KernelConfig) -> Result<Self> {
        let ipc = Arc::new(Ipc::new(registry.clone()));
        let service = Arc::new(ServiceApi::new(registry.clone()));

        let mut apis: HashMap<TypeId, (&'static str, ApiBox)> = HashMap::new();
        apis.insert(TypeId::of::<Ipc>(), (Ipc::NAME, ipc.clone()));
        apis.insert(TypeId::of::<ServiceApi>(), (ServiceApi::NAME, service.clone()));

        let kernel = Kernel {
            registry,
            config,
            apis: RwLock::new(apis),
            ipc,
            service,
        };

        if kernel.config.clear_on_boot {
            kernel
                .service
                .clear_functions(&kernel.config.default_namespace, &kernel.service_options())
                .await?;
        }
        tracing::debug!(namespace = %kernel.config.default_namespace, "kernel booted");
        Ok(kernel)
    }

    /// Boot a kernel whose registry lives on the far side of `channel`.
    pub async fn connect<C>(channel: C, config: KernelConfig) -> Result<Self>
    where
        C: Channel + 'static,
    {
        Self::boot(Arc::new(ChannelRegistry::new(channel)), config).await
    }

    pub fn registry(&self) -> Arc<dyn Registry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn ipc(&self) -> Arc<Ipc> {
        self.ipc.clone()
    }

    pub fn service(&self) -> Arc<ServiceApi> {
        self.service.clone()
    }

    pub fn ipc_options(&self) -> IpcOptions {
        self.config.ipc_options()
    }

    pub fn service_options(&self) -> ServiceOptions {
        self.config.service_options()
    }

    pub fn default_namespace(&self) -> &str {
        &self.config.default_namespace
    }

    /// Build `A` over this kernel and install it.
    pub fn install<A: Api>(&self) -> Result<Arc<A>> {
        if self.is_installed::<A>() {
            return Err(KernelError::AlreadyInstalled { name: A::NAME });
        }
        self.install_api(A::build(self))
    }

    /// Install an API built elsewhere.
    pub fn install_api<A: Api>(&self, api: A) -> Result<Arc<A>> {
        let api = Arc::new(api);
        let mut apis = self.apis.write().unwrap_or_else(PoisonError::into_inner);
        if apis.contains_key(&TypeId::of::<A>()) {
            return Err(KernelError::AlreadyInstalled { name: A::NAME });
        }
        apis.insert(TypeId::of::<A>(), (A::NAME, api.clone()));
        tracing::debug!(api = A::NAME, "installed");
        Ok(api)
    }

    /// Look up an installed API by type.
    pub fn api<A: Api>(&self) -> Option<Arc<A>> {
        let apis = self.apis.read().unwrap_or_else(PoisonError::into_inner);
        let (_, api) = apis.get(&TypeId::of::<A>())?;
        api.clone().downcast::<A>().ok()
    }

    pub fn is_installed<A: Api>(&self) -> bool {
        self.apis
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&TypeId::of::<A>())
    }

    /// Names of every installed API, sorted.
    pub fn installed(&self) -> Vec<&'static str> {
        let apis = self.apis.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<&'static str> = apis.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names
    }

    /// Answer registry requests arriving on `channel` from this kernel's
    /// registry.
    pub fn serve(&self, channel: Arc<dyn Channel>) -> ServeHandle {
        RegistryServer::serve(self.registry.clone(), channel)
    }
}
