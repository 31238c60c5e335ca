//! Component version repository capability.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use ocmr_core::component::{ComponentVersionDescriptor, Credentials, Identity};
use ocmr_core::config::PluginManagerConfig;
use ocmr_core::error::{OcmError, Result};
use ocmr_core::types::{Scheme, Type, Typed};
use ocmr_transport::{Location, Method, PluginClient};

use crate::plugin::descriptor::{CapabilityKind, PluginDescriptor};

use super::PluginRegistry;

/// Repository read/write surface a plugin (internal or external) provides.
#[async_trait]
pub trait ComponentVersionRepository: Send + Sync {
    /// Fetch the descriptor of one component version.
    async fn get_component_version(
        &self,
        name: &str,
        version: &str,
        credentials: &Credentials,
    ) -> Result<ComponentVersionDescriptor>;

    /// Store a component version descriptor.
    async fn add_component_version(
        &self,
        descriptor: &ComponentVersionDescriptor,
        credentials: &Credentials,
    ) -> Result<()>;

    /// Download a local resource of a component version to a location the
    /// caller can read from.
    async fn download_local_resource(
        &self,
        name: &str,
        version: &str,
        identity: &Identity,
        credentials: &Credentials,
    ) -> Result<Location>;

    /// Upload a local resource payload for a component version.
    async fn upload_local_resource(
        &self,
        name: &str,
        version: &str,
        identity: &Identity,
        location: &Location,
        credentials: &Credentials,
    ) -> Result<()>;

    /// List all versions of a component, newest first by repository order.
    async fn list_component_versions(
        &self,
        name: &str,
        credentials: &Credentials,
    ) -> Result<Vec<String>>;

    /// Consumer identity attributes for credential resolution.
    async fn identity(&self) -> Result<Identity>;
}

/// Identity response wire shape.
///
/// The identity map travels wrapped in a response struct so the contract
/// can grow additional fields without breaking decoders.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub identity: Identity,
}

/// Base64-encoded JSON form of an identity map, used in query parameters.
pub fn encode_identity(identity: &Identity) -> Result<String> {
    let raw = serde_json::to_vec(identity).map_err(|e| {
        OcmError::SerializationError(format!("failed to encode identity: {}", e))
    })?;
    Ok(base64::engine::general_purpose::STANDARD.encode(raw))
}

pub fn decode_identity(encoded: &str) -> Result<Identity> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| OcmError::SerializationError(format!("failed to decode identity: {}", e)))?;
    serde_json::from_slice(&raw)
        .map_err(|e| OcmError::SerializationError(format!("failed to parse identity: {}", e)))
}

/// Local-resource upload wire shape.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResourceRequest {
    pub name: String,
    pub version: String,
    pub identity: Identity,
    pub location: Location,
}

/// Version listing wire shape.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListVersionsResponse {
    pub versions: Vec<String>,
}

/// Repository backed by a running plugin's HTTP surface.
pub struct HttpRepository {
    client: Arc<PluginClient>,
}

impl HttpRepository {
    pub fn new(client: Arc<PluginClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ComponentVersionRepository for HttpRepository {
    async fn get_component_version(
        &self,
        name: &str,
        version: &str,
        credentials: &Credentials,
    ) -> Result<ComponentVersionDescriptor> {
        self.client
            .call(Method::Get, "component-version/download")
            .query("name", name)
            .query("version", version)
            .credentials(credentials)?
            .send_decode()
            .await
    }

    async fn add_component_version(
        &self,
        descriptor: &ComponentVersionDescriptor,
        credentials: &Credentials,
    ) -> Result<()> {
        self.client
            .call(Method::Post, "component-version/upload")
            .payload(descriptor)?
            .credentials(credentials)?
            .send()
            .await
            .map(|_| ())
    }

    async fn download_local_resource(
        &self,
        name: &str,
        version: &str,
        identity: &Identity,
        credentials: &Credentials,
    ) -> Result<Location> {
        self.client
            .call(Method::Get, "local-resource/download")
            .query("name", name)
            .query("version", version)
            .query("identity", encode_identity(identity)?)
            .credentials(credentials)?
            .send_decode()
            .await
    }

    async fn upload_local_resource(
        &self,
        name: &str,
        version: &str,
        identity: &Identity,
        location: &Location,
        credentials: &Credentials,
    ) -> Result<()> {
        let request = UploadResourceRequest {
            name: name.to_string(),
            version: version.to_string(),
            identity: identity.clone(),
            location: location.clone(),
        };
        self.client
            .call(Method::Post, "local-resource/upload")
            .payload(&request)?
            .credentials(credentials)?
            .send()
            .await
            .map(|_| ())
    }

    async fn list_component_versions(
        &self,
        name: &str,
        credentials: &Credentials,
    ) -> Result<Vec<String>> {
        let response: ListVersionsResponse = self
            .client
            .call(Method::Get, "component-versions")
            .query("name", name)
            .credentials(credentials)?
            .send_decode()
            .await?;
        Ok(response.versions)
    }

    async fn identity(&self) -> Result<Identity> {
        let response: IdentityResponse = self
            .client
            .call(Method::Post, "identity")
            .send_decode()
            .await?;
        Ok(response.identity)
    }
}

/// Registry of component version repository providers.
pub struct RepositoryRegistry {
    inner: PluginRegistry<dyn ComponentVersionRepository>,
}

impl RepositoryRegistry {
    pub fn new(scheme: Arc<Scheme>, config: PluginManagerConfig) -> Self {
        Self {
            inner: PluginRegistry::new(
                CapabilityKind::ComponentVersionRepository,
                scheme,
                config,
                Box::new(|client| {
                    Arc::new(HttpRepository::new(client)) as Arc<dyn ComponentVersionRepository>
                }),
            ),
        }
    }

    pub fn scheme(&self) -> &Arc<Scheme> {
        self.inner.scheme()
    }

    pub async fn add_plugin(&self, descriptor: PluginDescriptor) -> Result<()> {
        self.inner.add_plugin(descriptor).await
    }

    pub async fn register_internal(
        &self,
        typ: &Type,
        provider: Arc<dyn ComponentVersionRepository>,
    ) -> Result<()> {
        self.inner.register_internal(typ, provider).await
    }

    /// Resolve the repository provider for a typed repository
    /// specification, starting its plugin if needed.
    pub async fn repository_for<T: Typed + 'static>(
        &self,
        specification: &T,
    ) -> Result<Arc<dyn ComponentVersionRepository>> {
        self.inner.plugin_for(specification).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown().await
    }
}
