//! OCM Rust Runtime - Plugin Registries and OCI Layout Codec
//!
//! This crate hosts the plugin manager (process supervision, capability
//! registries, schema validation, plugin-side HTTP serving) and the
//! streaming OCI layout tar codec used to move artifact graphs across
//! process and network boundaries as a single archive blob.

pub mod oci;
pub mod plugin;

pub use plugin::{
    CapabilityKind, EndpointBuilder, ListerRegistry, PluginConfig, PluginDescriptor,
    RepositoryRegistry, TransformerRegistry,
};

/// OCM Rust version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
