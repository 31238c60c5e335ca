//! OCM Rust Core - Foundational Types and Abstractions
//!
//! This module provides the foundational types, traits, and abstractions
//! used across the OCM Rust plugin ecosystem.

pub mod component;
pub mod config;
pub mod error;
pub mod log;
pub mod types;

// Re-export commonly used types
pub use component::{ComponentVersionDescriptor, Credentials, Identity, Label};
pub use config::PluginManagerConfig;
pub use error::{OcmError, Result};
pub use log::{LogLevel, PluginLogRecord};
pub use types::{Scheme, Type, Typed};

/// OCM Rust version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
