//! End-to-end plugin lifecycle: an external plugin is declared, started on
//! first lookup, discovered over its stdout address line, health-checked,
//! and called over its unix-socket HTTP surface.
//!
//! The "plugin binary" is a shell script that announces a socket address
//! and idles; the capability server behind that socket is hosted by the
//! test itself, so the whole discovery and call path is exercised without
//! shipping a separate test binary.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use ocmr_core::component::{ComponentVersionDescriptor, Credentials, Identity};
use ocmr_core::config::PluginManagerConfig;
use ocmr_core::error::{OcmError, Result};
use ocmr_core::types::{Scheme, Type, Typed};
use ocmr_runtime::plugin::registry::repository::ComponentVersionRepository;
use ocmr_runtime::plugin::registry::transformer::BlobTransformer;
use ocmr_runtime::plugin::{
    validate_plugin, CapabilityKind, EndpointBuilder, PluginConfig, PluginDescriptor,
    RepositoryRegistry, TransformerRegistry,
};
use ocmr_transport::{ConnectionType, Location};

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

struct StaticRepository;

#[async_trait]
impl ComponentVersionRepository for StaticRepository {
    async fn get_component_version(
        &self,
        name: &str,
        version: &str,
        _credentials: &Credentials,
    ) -> Result<ComponentVersionDescriptor> {
        if name == "test-component" && version == "1.0.0" {
            Ok(ComponentVersionDescriptor::new(name, version))
        } else {
            Err(OcmError::NotFound(format!("{}:{}", name, version)))
        }
    }

    async fn add_component_version(
        &self,
        _descriptor: &ComponentVersionDescriptor,
        _credentials: &Credentials,
    ) -> Result<()> {
        Ok(())
    }

    async fn download_local_resource(
        &self,
        _name: &str,
        _version: &str,
        _identity: &Identity,
        _credentials: &Credentials,
    ) -> Result<Location> {
        Err(OcmError::NotFound("no local resources".to_string()))
    }

    async fn upload_local_resource(
        &self,
        _name: &str,
        _version: &str,
        _identity: &Identity,
        _location: &Location,
        _credentials: &Credentials,
    ) -> Result<()> {
        Ok(())
    }

    async fn list_component_versions(
        &self,
        name: &str,
        _credentials: &Credentials,
    ) -> Result<Vec<String>> {
        if name == "test-component" {
            Ok(vec!["1.0.0".to_string()])
        } else {
            Ok(Vec::new())
        }
    }

    async fn identity(&self) -> Result<Identity> {
        let mut identity = Identity::new();
        identity.insert("type".to_string(), "DummyRepository/v1".to_string());
        Ok(identity)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

fn write_announcer_script(dir: &std::path::Path, address: &str) -> std::path::PathBuf {
    let script = dir.join("dummy-plugin.sh");
    std::fs::write(&script, format!("#!/bin/sh\necho '{}'\nsleep 30\n", address)).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

#[tokio::test]
async fn test_external_plugin_lifecycle() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("dummy-plugin.sock");

    // The capability server the discovered address points at.
    let scheme = Arc::new(Scheme::new());
    scheme
        .register::<DummyRepositorySpec>("DummyRepository/v1".parse().unwrap())
        .unwrap();
    let (router, announcement) = EndpointBuilder::new()
        .register_repository::<DummyRepositorySpec>(&scheme, Arc::new(StaticRepository))
        .unwrap()
        .build();

    let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // The plugin "binary" only announces where that server listens.
    let script = write_announcer_script(
        dir.path(),
        &format!("http+unix://{}", socket_path.display()),
    );

    let registry = RepositoryRegistry::new(
        Arc::clone(&scheme),
        PluginManagerConfig {
            connect_timeout_secs: 5,
            health_timeout_secs: 3,
            health_interval_ms: 50,
            ..Default::default()
        },
    );
    let descriptor = PluginDescriptor::new(
        &script,
        PluginConfig {
            id: "dummy-repository".to_string(),
            connection_type: ConnectionType::UnixSocket,
            kind: CapabilityKind::ComponentVersionRepository,
            idle_timeout_secs: None,
        },
    )
    .with_announcement(announcement.clone());

    registry.add_plugin(descriptor).await.unwrap();

    // The announced schema accepts a conforming specification.
    let spec = DummyRepositorySpec {
        typ: "DummyRepository/v1".to_string(),
        base_url: "ghcr.io/open-component-model".to_string(),
    };
    let declared = &announcement.declared(CapabilityKind::ComponentVersionRepository)[0];
    assert!(validate_plugin(&spec, &declared.schema_bytes().unwrap()).unwrap());

    // First lookup starts the plugin and waits for health.
    let repository = registry.repository_for(&spec).await.unwrap();

    let credentials = Credentials::new();
    let descriptor = repository
        .get_component_version("test-component", "1.0.0", &credentials)
        .await
        .unwrap();
    assert_eq!(descriptor.to_string(), "test-component:1.0.0");

    let versions = repository
        .list_component_versions("test-component", &credentials)
        .await
        .unwrap();
    assert_eq!(versions, vec!["1.0.0"]);

    let identity = repository.identity().await.unwrap();
    assert_eq!(identity.get("type").unwrap(), "DummyRepository/v1");

    let missing = repository
        .get_component_version("test-component", "9.9.9", &credentials)
        .await;
    assert!(matches!(missing, Err(OcmError::TransportError(_))));

    // Second lookup reuses the cached instance instead of spawning again.
    let again = registry.repository_for(&spec).await.unwrap();
    let descriptor = again
        .get_component_version("test-component", "1.0.0", &credentials)
        .await
        .unwrap();
    assert_eq!(descriptor.to_string(), "test-component:1.0.0");

    registry.shutdown().await.unwrap();
    server.abort();
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
struct DummyTransformerSpec {
    #[serde(rename = "type", default)]
    typ: String,
}

impl Typed for DummyTransformerSpec {
    fn typ(&self) -> Type {
        self.typ.parse().unwrap_or_else(|_| Type::unversioned(""))
    }
}

/// Rewrites the location path according to the requested archive format.
struct ArchiveTransformer;

#[async_trait]
impl BlobTransformer for ArchiveTransformer {
    async fn transform_blob(
        &self,
        location: &Location,
        specification: &serde_json::Value,
        _credentials: &Credentials,
    ) -> Result<Location> {
        let format = specification
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or("tar");
        Ok(Location::local_file(format!("{}.{}", location.value, format)))
    }
}

#[tokio::test]
async fn test_external_transformer_round_trip() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("dummy-transformer.sock");

    let scheme = Arc::new(Scheme::new());
    scheme
        .register::<DummyTransformerSpec>("ArchiveTransformer/v1".parse().unwrap())
        .unwrap();
    let (router, announcement) = EndpointBuilder::new()
        .register_transformer::<DummyTransformerSpec>(&scheme, Arc::new(ArchiveTransformer))
        .unwrap()
        .build();

    let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let script = write_announcer_script(
        dir.path(),
        &format!("http+unix://{}", socket_path.display()),
    );

    let registry = TransformerRegistry::new(
        Arc::clone(&scheme),
        PluginManagerConfig {
            connect_timeout_secs: 5,
            health_timeout_secs: 3,
            health_interval_ms: 50,
            ..Default::default()
        },
    );
    let descriptor = PluginDescriptor::new(
        &script,
        PluginConfig {
            id: "dummy-transformer".to_string(),
            connection_type: ConnectionType::UnixSocket,
            kind: CapabilityKind::BlobTransformer,
            idle_timeout_secs: None,
        },
    )
    .with_announcement(announcement);

    registry.add_plugin(descriptor).await.unwrap();

    let spec = DummyTransformerSpec {
        typ: "ArchiveTransformer/v1".to_string(),
    };
    let transformer = registry.transformer_for(&spec).await.unwrap();

    // The call crosses the wire: request body, credentials header, and
    // the decoded location all travel over the plugin's HTTP surface.
    let transformed = transformer
        .transform_blob(
            &Location::local_file("/tmp/blob"),
            &serde_json::json!({"format": "tgz"}),
            &Credentials::new(),
        )
        .await
        .unwrap();
    assert_eq!(transformed, Location::local_file("/tmp/blob.tgz"));

    registry.shutdown().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_concurrent_lookups_start_plugin_once() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("counted-plugin.sock");

    let scheme = Arc::new(Scheme::new());
    scheme
        .register::<DummyRepositorySpec>("DummyRepository/v1".parse().unwrap())
        .unwrap();
    let (router, announcement) = EndpointBuilder::new()
        .register_repository::<DummyRepositorySpec>(&scheme, Arc::new(StaticRepository))
        .unwrap()
        .build();

    let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // Each invocation of the "binary" appends a line before announcing,
    // so the log records how many processes were actually spawned.
    let spawn_log = dir.path().join("spawns.log");
    let script = dir.path().join("counted-plugin.sh");
    std::fs::write(
        &script,
        format!(
            "#!/bin/sh\necho spawned >> {}\necho 'http+unix://{}'\nsleep 30\n",
            spawn_log.display(),
            socket_path.display(),
        ),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let registry = RepositoryRegistry::new(
        Arc::clone(&scheme),
        PluginManagerConfig {
            connect_timeout_secs: 5,
            health_timeout_secs: 3,
            health_interval_ms: 50,
            ..Default::default()
        },
    );
    let descriptor = PluginDescriptor::new(
        &script,
        PluginConfig {
            id: "counted-repository".to_string(),
            connection_type: ConnectionType::UnixSocket,
            kind: CapabilityKind::ComponentVersionRepository,
            idle_timeout_secs: None,
        },
    )
    .with_announcement(announcement);

    registry.add_plugin(descriptor).await.unwrap();

    let spec = DummyRepositorySpec {
        typ: "DummyRepository/v1".to_string(),
        base_url: String::new(),
    };

    // All three first lookups race; only one may spawn the process.
    let (a, b, c) = tokio::join!(
        registry.repository_for(&spec),
        registry.repository_for(&spec),
        registry.repository_for(&spec),
    );

    let credentials = Credentials::new();
    for repository in [a.unwrap(), b.unwrap(), c.unwrap()] {
        let descriptor = repository
            .get_component_version("test-component", "1.0.0", &credentials)
            .await
            .unwrap();
        assert_eq!(descriptor.to_string(), "test-component:1.0.0");
    }

    assert_eq!(std::fs::read_to_string(&spawn_log).unwrap(), "spawned\n");

    registry.shutdown().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_lookup_without_registration_fails() {
    let registry = RepositoryRegistry::new(
        Arc::new(Scheme::new()),
        PluginManagerConfig::default(),
    );
    let spec = DummyRepositorySpec {
        typ: "Unregistered/v1".to_string(),
        base_url: String::new(),
    };
    let result = registry.repository_for(&spec).await;
    assert!(matches!(result, Err(OcmError::NotFound(_))));
}
