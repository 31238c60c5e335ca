//! Capability registries.
//!
//! A registry maps wire types to capability providers. A provider is either
//! an internal (in-process) implementation or an external plugin binary
//! that is started lazily on first lookup and cached for the registry's
//! lifetime. The generic core is shared; each capability exposes a thin
//! typed wrapper over it.

pub mod lister;
pub mod repository;
pub mod transformer;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use ocmr_core::config::PluginManagerConfig;
use ocmr_core::error::{OcmError, Result};
use ocmr_core::types::{Scheme, Type, Typed};
use ocmr_transport::PluginClient;

use super::descriptor::{CapabilityKind, PluginDescriptor};
use super::supervisor::{start_plugin, RunningPlugin};

/// Builds a capability provider from a started plugin's client.
type ClientFactory<P> = Box<dyn Fn(Arc<PluginClient>) -> Arc<P> + Send + Sync>;

struct ConstructedPlugin<P: ?Sized> {
    provider: Arc<P>,
    running: RunningPlugin,
}

struct RegistryState<P: ?Sized> {
    /// Declared external plugins, at most one per type.
    descriptors: HashMap<Type, PluginDescriptor>,
    /// Started external plugins by plugin ID.
    constructed: HashMap<String, ConstructedPlugin<P>>,
    /// In-process implementations, keyed by type and every alias.
    internal: HashMap<Type, Arc<P>>,
    /// Stderr log streamers for started plugins.
    streamers: Vec<JoinHandle<()>>,
}

impl<P: ?Sized> Default for RegistryState<P> {
    fn default() -> Self {
        Self {
            descriptors: HashMap::new(),
            constructed: HashMap::new(),
            internal: HashMap::new(),
            streamers: Vec::new(),
        }
    }
}

/// Generic registry core, instantiated per capability.
pub struct PluginRegistry<P: ?Sized> {
    kind: CapabilityKind,
    scheme: Arc<Scheme>,
    config: PluginManagerConfig,
    factory: ClientFactory<P>,
    state: tokio::sync::Mutex<RegistryState<P>>,
}

impl<P: ?Sized + Send + Sync + 'static> PluginRegistry<P> {
    pub fn new(
        kind: CapabilityKind,
        scheme: Arc<Scheme>,
        config: PluginManagerConfig,
        factory: ClientFactory<P>,
    ) -> Self {
        Self {
            kind,
            scheme,
            config,
            factory,
            state: tokio::sync::Mutex::new(RegistryState::default()),
        }
    }

    pub fn scheme(&self) -> &Arc<Scheme> {
        &self.scheme
    }

    /// Declare an external plugin for every type it announces under this
    /// registry's capability kind.
    ///
    /// At most one plugin per type: a second declaration for an already
    /// covered type fails naming the existing plugin.
    pub async fn add_plugin(&self, descriptor: PluginDescriptor) -> Result<()> {
        let types = descriptor.types_for(self.kind);
        if types.is_empty() {
            return Err(OcmError::RegistryError(format!(
                "plugin {} declares no {} types",
                descriptor.id(),
                self.kind,
            )));
        }

        let mut state = self.state.lock().await;
        for typ in &types {
            if let Some(existing) = state.descriptors.get(typ) {
                return Err(OcmError::RegistryError(format!(
                    "type {} is already registered by plugin {}",
                    typ,
                    existing.id(),
                )));
            }
        }
        for typ in types {
            tracing::debug!(plugin = %descriptor.id(), typ = %typ, kind = %self.kind, "declared external plugin");
            state.descriptors.insert(typ, descriptor.clone());
        }
        Ok(())
    }

    /// Register an in-process implementation for `typ` and all of its
    /// scheme aliases. Internal registrations never spawn a process and win
    /// over external declarations at lookup.
    pub async fn register_internal(&self, typ: &Type, provider: Arc<P>) -> Result<()> {
        let mut keys = vec![typ.clone()];
        keys.extend(self.scheme.aliases(typ));

        let mut state = self.state.lock().await;
        for key in keys {
            state.internal.insert(key, Arc::clone(&provider));
        }
        Ok(())
    }

    /// Resolve a provider for a typed specification.
    ///
    /// Internal implementations are checked first, matched by the
    /// specification's concrete Rust type through the scheme and then by
    /// its wire type tag. External plugins are matched by the wire type
    /// only; a specification without a type cannot reach them. The first
    /// external lookup for a type starts the plugin process and can block
    /// for the full discovery and health-check budget. The registry lock is
    /// held across the whole start sequence, so concurrent first lookups
    /// for the same plugin start it once.
    pub async fn plugin_for<T: Typed + 'static>(&self, specification: &T) -> Result<Arc<P>> {
        let wire_type = specification.typ();

        let mut state = self.state.lock().await;

        if let Some(typ) = self.scheme.type_for::<T>() {
            if let Some(provider) = state.internal.get(&typ) {
                return Ok(Arc::clone(provider));
            }
        }
        if !wire_type.is_empty() {
            if let Some(provider) = state.internal.get(&wire_type) {
                return Ok(Arc::clone(provider));
            }
        }

        if wire_type.is_empty() {
            return Err(OcmError::RegistryError(
                "external plugins cannot be fetched without a type".to_string(),
            ));
        }

        let descriptor = state
            .descriptors
            .get(&wire_type)
            .cloned()
            .ok_or_else(|| {
                OcmError::NotFound(format!(
                    "no {} plugin registered for type {}",
                    self.kind, wire_type,
                ))
            })?;

        if let Some(constructed) = state.constructed.get(descriptor.id()) {
            return Ok(Arc::clone(&constructed.provider));
        }

        let (running, streamer) = start_plugin(&descriptor, &self.config).await?;
        let provider = (self.factory)(running.client());
        state.streamers.push(streamer);
        state.constructed.insert(
            descriptor.id().to_string(),
            ConstructedPlugin {
                provider: Arc::clone(&provider),
                running,
            },
        );
        Ok(provider)
    }

    /// True when a provider (internal or external) exists for `typ`.
    pub async fn has_type(&self, typ: &Type) -> bool {
        let state = self.state.lock().await;
        state.internal.contains_key(typ) || state.descriptors.contains_key(typ)
    }

    /// IDs of started external plugins.
    pub async fn started(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state.constructed.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Interrupt every started plugin and stop their log streamers.
    ///
    /// Best effort: signal errors are collected and joined, not raced out
    /// on the first failure. Does not wait for process exit.
    pub async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        let mut failures = Vec::new();
        for (id, constructed) in state.constructed.drain() {
            tracing::info!(plugin = %id, "interrupting plugin");
            if let Err(e) = constructed.running.interrupt() {
                failures.push(e.to_string());
            }
        }
        for streamer in state.streamers.drain(..) {
            streamer.abort();
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(OcmError::RegistryError(format!(
                "plugin shutdown failures: {}",
                failures.join("; "),
            )))
        }
    }

    /// Resolve an internal provider by concrete Rust type without a value.
    pub async fn internal_for_rust_type<T: 'static>(&self) -> Option<Arc<P>> {
        let typ = self.scheme.type_for::<T>()?;
        let state = self.state.lock().await;
        state.internal.get(&typ).map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[async_trait]
    trait Greeter: Send + Sync {
        async fn greet(&self) -> String;
    }

    struct StaticGreeter(String);

    #[async_trait]
    impl Greeter for StaticGreeter {
        async fn greet(&self) -> String {
            self.0.clone()
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct GreeterSpec {
        #[serde(rename = "type", default)]
        typ: String,
    }

    impl Typed for GreeterSpec {
        fn typ(&self) -> Type {
            self.typ.parse().unwrap_or_else(|_| Type::unversioned(""))
        }
    }

    fn registry() -> PluginRegistry<dyn Greeter> {
        let scheme = Arc::new(Scheme::new());
        PluginRegistry::new(
            CapabilityKind::ComponentLister,
            scheme,
            PluginManagerConfig::default(),
            Box::new(|_client| Arc::new(StaticGreeter("external".to_string())) as Arc<dyn Greeter>),
        )
    }

    fn spec(typ: &str) -> GreeterSpec {
        GreeterSpec {
            typ: typ.to_string(),
        }
    }

    #[tokio::test]
    async fn test_internal_lookup_by_wire_type() {
        let registry = registry();
        let typ: Type = "Greeter/v1".parse().unwrap();
        registry
            .register_internal(&typ, Arc::new(StaticGreeter("internal".to_string())))
            .await
            .unwrap();

        let provider = registry.plugin_for(&spec("Greeter/v1")).await.unwrap();
        assert_eq!(provider.greet().await, "internal");
    }

    #[tokio::test]
    async fn test_internal_lookup_covers_aliases() {
        let scheme = Arc::new(Scheme::new());
        let typ: Type = "Greeter/v1".parse().unwrap();
        // Registering "Greeter/v1" implicitly aliases the unversioned form.
        scheme.register::<GreeterSpec>(typ.clone()).unwrap();

        let registry: PluginRegistry<dyn Greeter> = PluginRegistry::new(
            CapabilityKind::ComponentLister,
            scheme,
            PluginManagerConfig::default(),
            Box::new(|_client| Arc::new(StaticGreeter("external".to_string())) as Arc<dyn Greeter>),
        );
        registry
            .register_internal(&typ, Arc::new(StaticGreeter("internal".to_string())))
            .await
            .unwrap();

        let provider = registry.plugin_for(&spec("Greeter")).await.unwrap();
        assert_eq!(provider.greet().await, "internal");
    }

    #[tokio::test]
    async fn test_lookup_without_type_fails() {
        let registry = registry();
        let result = registry.plugin_for(&GreeterSpec::default()).await;
        match result {
            Err(OcmError::RegistryError(message)) => {
                assert!(message.contains("without a type"));
            }
            other => panic!("expected registry error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_lookup_unknown_type_fails() {
        let registry = registry();
        let result = registry.plugin_for(&spec("Unknown/v1")).await;
        assert!(matches!(result, Err(OcmError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_plugin_declaration_fails() {
        use crate::plugin::descriptor::{
            CapabilityAnnouncement, DeclaredType, PluginConfig, PluginDescriptor,
        };
        use ocmr_transport::ConnectionType;

        let registry = registry();
        let schema = serde_json::json!({"type": "object"});
        let declared = DeclaredType::new("Greeter/v1".parse().unwrap(), &schema).unwrap();
        let mut announcement = CapabilityAnnouncement::default();
        announcement
            .types
            .insert(CapabilityKind::ComponentLister, vec![declared]);

        let descriptor = |id: &str| {
            PluginDescriptor::new(
                "/usr/local/bin/greeter",
                PluginConfig {
                    id: id.to_string(),
                    connection_type: ConnectionType::UnixSocket,
                    kind: CapabilityKind::ComponentLister,
                    idle_timeout_secs: None,
                },
            )
            .with_announcement(announcement.clone())
        };

        registry.add_plugin(descriptor("first")).await.unwrap();
        let result = registry.add_plugin(descriptor("second")).await;
        match result {
            Err(OcmError::RegistryError(message)) => {
                assert!(message.contains("first"), "unexpected message: {}", message);
            }
            other => panic!("expected registry error, got {:?}", other.map(|_| ())),
        }
    }
}
