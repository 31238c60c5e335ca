//! Blob transformer capability.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ocmr_core::component::Credentials;
use ocmr_core::config::PluginManagerConfig;
use ocmr_core::error::Result;
use ocmr_core::types::{Scheme, Type, Typed};
use ocmr_transport::{Location, Method, PluginClient};

use crate::plugin::descriptor::{CapabilityKind, PluginDescriptor};

use super::PluginRegistry;

/// Transforms a blob payload into another blob payload, e.g. re-encoding a
/// layout archive or extracting a nested artifact.
#[async_trait]
pub trait BlobTransformer: Send + Sync {
    /// Transform the blob at `location` according to `specification`,
    /// returning where the transformed payload lives.
    async fn transform_blob(
        &self,
        location: &Location,
        specification: &serde_json::Value,
        credentials: &Credentials,
    ) -> Result<Location>;
}

/// Blob transform wire shape.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransformRequest {
    pub location: Location,
    pub specification: serde_json::Value,
}

/// Transformer backed by a running plugin's HTTP surface.
pub struct HttpTransformer {
    client: Arc<PluginClient>,
}

impl HttpTransformer {
    pub fn new(client: Arc<PluginClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobTransformer for HttpTransformer {
    async fn transform_blob(
        &self,
        location: &Location,
        specification: &serde_json::Value,
        credentials: &Credentials,
    ) -> Result<Location> {
        let request = TransformRequest {
            location: location.clone(),
            specification: specification.clone(),
        };
        self.client
            .call(Method::Post, "blob/transform")
            .payload(&request)?
            .credentials(credentials)?
            .send_decode()
            .await
    }
}

/// Registry of blob transformer providers.
pub struct TransformerRegistry {
    inner: PluginRegistry<dyn BlobTransformer>,
}

impl TransformerRegistry {
    pub fn new(scheme: Arc<Scheme>, config: PluginManagerConfig) -> Self {
        Self {
            inner: PluginRegistry::new(
                CapabilityKind::BlobTransformer,
                scheme,
                config,
                Box::new(|client| {
                    Arc::new(HttpTransformer::new(client)) as Arc<dyn BlobTransformer>
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
        provider: Arc<dyn BlobTransformer>,
    ) -> Result<()> {
        self.inner.register_internal(typ, provider).await
    }

    pub async fn transformer_for<T: Typed + 'static>(
        &self,
        specification: &T,
    ) -> Result<Arc<dyn BlobTransformer>> {
        self.inner.plugin_for(specification).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown().await
    }
}
