//! HTTP endpoint builder for plugin servers.
//!
//! A plugin declares its capabilities by registering typed providers here;
//! the builder assembles the axum router serving the capability HTTP
//! surface and the announcement the plugin reports to the manager. JSON
//! Schemas for each registered specification type are generated from the
//! Rust type.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use schemars::JsonSchema;

use ocmr_core::component::{ComponentVersionDescriptor, Credentials};
use ocmr_core::error::{OcmError, Result};
use ocmr_core::types::{Scheme, Typed};
use ocmr_transport::Location;

use super::descriptor::{CapabilityAnnouncement, CapabilityKind, DeclaredType};
use super::registry::lister::{ComponentLister, ListComponentsRequest, ListComponentsResponse};
use super::registry::repository::{
    decode_identity, ComponentVersionRepository, IdentityResponse, ListVersionsResponse,
    UploadResourceRequest,
};
use super::registry::transformer::{BlobTransformer, TransformRequest};

/// Accumulates capability routes and declared types for one plugin server.
pub struct EndpointBuilder {
    router: Router,
    routed: BTreeSet<CapabilityKind>,
    types: BTreeMap<CapabilityKind, Vec<DeclaredType>>,
}

impl Default for EndpointBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointBuilder {
    pub fn new() -> Self {
        Self {
            router: Router::new().route("/healthz", get(healthz)),
            routed: BTreeSet::new(),
            types: BTreeMap::new(),
        }
    }

    /// Register a repository provider for the wire type the scheme has
    /// registered for `T`.
    ///
    /// The first repository registration installs the capability's routes;
    /// further registrations add declared types served by the same
    /// provider set.
    pub fn register_repository<T>(
        mut self,
        scheme: &Scheme,
        provider: Arc<dyn ComponentVersionRepository>,
    ) -> Result<Self>
    where
        T: Typed + JsonSchema + 'static,
    {
        let typ = self.declared_type::<T>(scheme, CapabilityKind::ComponentVersionRepository)?;
        tracing::debug!(typ = %typ, "registered repository capability");
        if self.routed.insert(CapabilityKind::ComponentVersionRepository) {
            self.router = self.router.merge(repository_routes(provider));
        }
        Ok(self)
    }

    pub fn register_transformer<T>(
        mut self,
        scheme: &Scheme,
        provider: Arc<dyn BlobTransformer>,
    ) -> Result<Self>
    where
        T: Typed + JsonSchema + 'static,
    {
        let typ = self.declared_type::<T>(scheme, CapabilityKind::BlobTransformer)?;
        tracing::debug!(typ = %typ, "registered transformer capability");
        if self.routed.insert(CapabilityKind::BlobTransformer) {
            self.router = self.router.merge(transformer_routes(provider));
        }
        Ok(self)
    }

    pub fn register_lister<T>(
        mut self,
        scheme: &Scheme,
        provider: Arc<dyn ComponentLister>,
    ) -> Result<Self>
    where
        T: Typed + JsonSchema + 'static,
    {
        let typ = self.declared_type::<T>(scheme, CapabilityKind::ComponentLister)?;
        tracing::debug!(typ = %typ, "registered lister capability");
        if self.routed.insert(CapabilityKind::ComponentLister) {
            self.router = self.router.merge(lister_routes(provider));
        }
        Ok(self)
    }

    /// Derive the wire type for `T`, generate its JSON Schema, and record
    /// the pair under `kind`.
    fn declared_type<T>(
        &mut self,
        scheme: &Scheme,
        kind: CapabilityKind,
    ) -> Result<ocmr_core::types::Type>
    where
        T: Typed + JsonSchema + 'static,
    {
        let typ = scheme.type_for::<T>().ok_or_else(|| {
            OcmError::RegistryError(
                "specification type is not registered in the scheme".to_string(),
            )
        })?;
        let schema = schemars::gen::SchemaGenerator::default().into_root_schema_for::<T>();
        let schema_value = serde_json::to_value(schema).map_err(|e| {
            OcmError::SchemaError(format!("failed to encode generated schema: {}", e))
        })?;
        self.types
            .entry(kind)
            .or_default()
            .push(DeclaredType::new(typ.clone(), &schema_value)?);
        Ok(typ)
    }

    /// What this plugin announces to the manager.
    pub fn announcement(&self) -> CapabilityAnnouncement {
        CapabilityAnnouncement {
            types: self.types.clone(),
        }
    }

    pub fn build(self) -> (Router, CapabilityAnnouncement) {
        let announcement = CapabilityAnnouncement { types: self.types };
        (self.router, announcement)
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

type RepositoryState = Arc<dyn ComponentVersionRepository>;
type HttpResult<T> = std::result::Result<Json<T>, (StatusCode, Json<serde_json::Value>)>;

fn repository_routes(provider: RepositoryState) -> Router {
    Router::new()
        .route("/component-version/download", get(download_component_version))
        .route("/component-version/upload", post(upload_component_version))
        .route("/local-resource/download", get(download_local_resource))
        .route("/local-resource/upload", post(upload_local_resource))
        .route("/component-versions", get(list_component_versions))
        .route("/identity", post(identity))
        .with_state(provider)
}

fn transformer_routes(provider: Arc<dyn BlobTransformer>) -> Router {
    Router::new()
        .route("/blob/transform", post(transform_blob))
        .with_state(provider)
}

fn lister_routes(provider: Arc<dyn ComponentLister>) -> Router {
    Router::new()
        .route("/components/list", post(list_components))
        .with_state(provider)
}

async fn download_component_version(
    State(provider): State<RepositoryState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> HttpResult<ComponentVersionDescriptor> {
    let credentials = credentials_from(&headers).map_err(http_error)?;
    let name = required(&params, "name").map_err(http_error)?;
    let version = required(&params, "version").map_err(http_error)?;
    provider
        .get_component_version(name, version, &credentials)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn upload_component_version(
    State(provider): State<RepositoryState>,
    headers: HeaderMap,
    Json(descriptor): Json<ComponentVersionDescriptor>,
) -> HttpResult<serde_json::Value> {
    let credentials = credentials_from(&headers).map_err(http_error)?;
    provider
        .add_component_version(&descriptor, &credentials)
        .await
        .map(|_| Json(serde_json::json!({})))
        .map_err(http_error)
}

async fn download_local_resource(
    State(provider): State<RepositoryState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> HttpResult<Location> {
    let credentials = credentials_from(&headers).map_err(http_error)?;
    let name = required(&params, "name").map_err(http_error)?;
    let version = required(&params, "version").map_err(http_error)?;
    let identity = match params.get("identity") {
        Some(encoded) => decode_identity(encoded).map_err(http_error)?,
        None => Default::default(),
    };
    provider
        .download_local_resource(name, version, &identity, &credentials)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn upload_local_resource(
    State(provider): State<RepositoryState>,
    headers: HeaderMap,
    Json(request): Json<UploadResourceRequest>,
) -> HttpResult<serde_json::Value> {
    let credentials = credentials_from(&headers).map_err(http_error)?;
    provider
        .upload_local_resource(
            &request.name,
            &request.version,
            &request.identity,
            &request.location,
            &credentials,
        )
        .await
        .map(|_| Json(serde_json::json!({})))
        .map_err(http_error)
}

async fn list_component_versions(
    State(provider): State<RepositoryState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> HttpResult<ListVersionsResponse> {
    let credentials = credentials_from(&headers).map_err(http_error)?;
    let name = required(&params, "name").map_err(http_error)?;
    provider
        .list_component_versions(name, &credentials)
        .await
        .map(|versions| Json(ListVersionsResponse { versions }))
        .map_err(http_error)
}

async fn identity(State(provider): State<RepositoryState>) -> HttpResult<IdentityResponse> {
    provider
        .identity()
        .await
        .map(|identity| Json(IdentityResponse { identity }))
        .map_err(http_error)
}

async fn transform_blob(
    State(provider): State<Arc<dyn BlobTransformer>>,
    headers: HeaderMap,
    Json(request): Json<TransformRequest>,
) -> HttpResult<Location> {
    let credentials = credentials_from(&headers).map_err(http_error)?;
    provider
        .transform_blob(&request.location, &request.specification, &credentials)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn list_components(
    State(provider): State<Arc<dyn ComponentLister>>,
    headers: HeaderMap,
    Json(request): Json<ListComponentsRequest>,
) -> HttpResult<ListComponentsResponse> {
    let credentials = credentials_from(&headers).map_err(http_error)?;
    provider
        .list_components(&request, &credentials)
        .await
        .map(|components| Json(ListComponentsResponse { components }))
        .map_err(http_error)
}

/// Credentials arrive as a JSON object in the `Authorization` header, not a
/// bearer token. A missing header means anonymous access.
fn credentials_from(headers: &HeaderMap) -> Result<Credentials> {
    let header = match headers.get(axum::http::header::AUTHORIZATION) {
        Some(header) => header,
        None => return Ok(Credentials::new()),
    };
    let raw = header.to_str().map_err(|e| {
        OcmError::SerializationError(format!("authorization header is not valid text: {}", e))
    })?;
    serde_json::from_str(raw).map_err(|e| {
        OcmError::SerializationError(format!("authorization header is not a JSON object: {}", e))
    })
}

fn required<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .map(|v| v.as_str())
        .ok_or_else(|| OcmError::ConfigError(format!("missing query parameter {}", key)))
}

fn http_error(error: OcmError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &error {
        OcmError::NotFound(_) => StatusCode::NOT_FOUND,
        OcmError::SchemaError(_) | OcmError::SerializationError(_) | OcmError::ConfigError(_) => {
            StatusCode::BAD_REQUEST
        }
        OcmError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": error.to_string() })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ocmr_core::component::Identity;
    use ocmr_core::types::Type;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
    struct DummyRepositorySpec {
        #[serde(rename = "type", default)]
        typ: String,
        #[serde(rename = "baseUrl", default)]
        base_url: String,
    }

    impl Typed for DummyRepositorySpec {
        fn typ(&self) -> Type {
            self.typ.parse().unwrap_or_else(|_| Type::unversioned(""))
        }
    }

    struct EmptyRepository;

    #[async_trait]
    impl ComponentVersionRepository for EmptyRepository {
        async fn get_component_version(
            &self,
            name: &str,
            version: &str,
            _credentials: &Credentials,
        ) -> ocmr_core::error::Result<ComponentVersionDescriptor> {
            Err(OcmError::NotFound(format!("{}:{}", name, version)))
        }

        async fn add_component_version(
            &self,
            _descriptor: &ComponentVersionDescriptor,
            _credentials: &Credentials,
        ) -> ocmr_core::error::Result<()> {
            Ok(())
        }

        async fn download_local_resource(
            &self,
            _name: &str,
            _version: &str,
            _identity: &Identity,
            _credentials: &Credentials,
        ) -> ocmr_core::error::Result<Location> {
            Err(OcmError::NotFound("no resources".to_string()))
        }

        async fn upload_local_resource(
            &self,
            _name: &str,
            _version: &str,
            _identity: &Identity,
            _location: &Location,
            _credentials: &Credentials,
        ) -> ocmr_core::error::Result<()> {
            Ok(())
        }

        async fn list_component_versions(
            &self,
            _name: &str,
            _credentials: &Credentials,
        ) -> ocmr_core::error::Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn identity(&self) -> ocmr_core::error::Result<Identity> {
            Ok(Identity::new())
        }
    }

    #[test]
    fn test_announcement_lists_registered_type() {
        let scheme = Scheme::new();
        scheme
            .register::<DummyRepositorySpec>("DummyRepository/v1".parse().unwrap())
            .unwrap();

        let builder = EndpointBuilder::new()
            .register_repository::<DummyRepositorySpec>(&scheme, Arc::new(EmptyRepository))
            .unwrap();

        let announcement = builder.announcement();
        let declared = announcement.declared(CapabilityKind::ComponentVersionRepository);
        assert_eq!(declared.len(), 1);
        assert_eq!(declared[0].typ.to_string(), "DummyRepository/v1");

        // Generated schema decodes back to a JSON Schema document.
        let schema: serde_json::Value =
            serde_json::from_slice(&declared[0].schema_bytes().unwrap()).unwrap();
        assert!(schema.is_object());
    }

    #[test]
    fn test_unregistered_type_fails() {
        let scheme = Scheme::new();
        let result = EndpointBuilder::new()
            .register_repository::<DummyRepositorySpec>(&scheme, Arc::new(EmptyRepository));
        assert!(matches!(result, Err(OcmError::RegistryError(_))));
    }

    #[test]
    fn test_credentials_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            r#"{"username":"u","password":"p"}"#.parse().unwrap(),
        );
        let credentials = credentials_from(&headers).unwrap();
        assert_eq!(credentials.get("username").unwrap(), "u");

        assert!(credentials_from(&HeaderMap::new()).unwrap().is_empty());

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer token".parse().unwrap(),
        );
        assert!(credentials_from(&headers).is_err());
    }
}
