//! Component lister capability.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ocmr_core::component::Credentials;
use ocmr_core::config::PluginManagerConfig;
use ocmr_core::error::Result;
use ocmr_core::types::{Scheme, Type, Typed};
use ocmr_transport::{Method, PluginClient};

use crate::plugin::descriptor::{CapabilityKind, PluginDescriptor};

use super::PluginRegistry;

/// Component listing request against a repository specification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListComponentsRequest {
    /// Optional name prefix filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Maximum number of names to return; unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListComponentsResponse {
    pub components: Vec<String>,
}

/// Enumerates component names in a repository.
#[async_trait]
pub trait ComponentLister: Send + Sync {
    async fn list_components(
        &self,
        request: &ListComponentsRequest,
        credentials: &Credentials,
    ) -> Result<Vec<String>>;
}

/// Lister backed by a running plugin's HTTP surface.
pub struct HttpLister {
    client: Arc<PluginClient>,
}

impl HttpLister {
    pub fn new(client: Arc<PluginClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ComponentLister for HttpLister {
    async fn list_components(
        &self,
        request: &ListComponentsRequest,
        credentials: &Credentials,
    ) -> Result<Vec<String>> {
        let response: ListComponentsResponse = self
            .client
            .call(Method::Post, "components/list")
            .payload(request)?
            .credentials(credentials)?
            .send_decode()
            .await?;
        Ok(response.components)
    }
}

/// Registry of component lister providers.
pub struct ListerRegistry {
    inner: PluginRegistry<dyn ComponentLister>,
}

impl ListerRegistry {
    pub fn new(scheme: Arc<Scheme>, config: PluginManagerConfig) -> Self {
        Self {
            inner: PluginRegistry::new(
                CapabilityKind::ComponentLister,
                scheme,
                config,
                Box::new(|client| Arc::new(HttpLister::new(client)) as Arc<dyn ComponentLister>),
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
        provider: Arc<dyn ComponentLister>,
    ) -> Result<()> {
        self.inner.register_internal(typ, provider).await
    }

    pub async fn lister_for<T: Typed + 'static>(
        &self,
        specification: &T,
    ) -> Result<Arc<dyn ComponentLister>> {
        self.inner.plugin_for(specification).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticLister(Vec<String>);

    #[async_trait]
    impl ComponentLister for StaticLister {
        async fn list_components(
            &self,
            request: &ListComponentsRequest,
            _credentials: &Credentials,
        ) -> Result<Vec<String>> {
            let mut names: Vec<String> = match &request.prefix {
                Some(prefix) => self
                    .0
                    .iter()
                    .filter(|n| n.starts_with(prefix))
                    .cloned()
                    .collect(),
                None => self.0.clone(),
            };
            if let Some(limit) = request.limit {
                names.truncate(limit);
            }
            Ok(names)
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct ListerSpec {
        #[serde(rename = "type", default)]
        typ: String,
    }

    impl Typed for ListerSpec {
        fn typ(&self) -> Type {
            self.typ.parse().unwrap_or_else(|_| Type::unversioned(""))
        }
    }

    #[tokio::test]
    async fn test_internal_lister() {
        let registry =
            ListerRegistry::new(Arc::new(Scheme::new()), PluginManagerConfig::default());
        let typ: Type = "StaticLister/v1".parse().unwrap();
        registry
            .register_internal(
                &typ,
                Arc::new(StaticLister(vec![
                    "acme.org/a".to_string(),
                    "acme.org/b".to_string(),
                    "other.org/c".to_string(),
                ])),
            )
            .await
            .unwrap();

        let lister = registry
            .lister_for(&ListerSpec {
                typ: "StaticLister/v1".to_string(),
            })
            .await
            .unwrap();
        let names = lister
            .list_components(
                &ListComponentsRequest {
                    prefix: Some("acme.org/".to_string()),
                    limit: None,
                },
                &Credentials::new(),
            )
            .await
            .unwrap();
        assert_eq!(names, vec!["acme.org/a", "acme.org/b"]);
    }
}
