//! Plugin management: descriptors, process supervision, capability
//! registries, schema validation, and the plugin-side HTTP server.

pub mod descriptor;
pub mod endpoints;
pub mod registry;
pub mod schema;
pub mod server;
pub mod supervisor;

pub use descriptor::{
    CapabilityAnnouncement, CapabilityKind, DeclaredType, PluginConfig, PluginDescriptor,
};
pub use endpoints::EndpointBuilder;
pub use registry::lister::{ComponentLister, ListComponentsRequest, ListerRegistry};
pub use registry::repository::{ComponentVersionRepository, RepositoryRegistry};
pub use registry::transformer::{BlobTransformer, TransformerRegistry};
pub use registry::PluginRegistry;
pub use schema::validate_plugin;
pub use supervisor::{start_plugin, RunningPlugin};
