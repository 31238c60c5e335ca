//! RPC call layer for OCM plugins.
//!
//! Plugins serve a plain HTTP JSON surface over either a unix domain socket
//! or TCP. This crate builds requests against both, serializes payloads,
//! attaches credentials/query parameters, and decodes JSON responses. No
//! retries happen at this layer; retry policy, if any, belongs to the caller.

pub mod client;
pub mod location;

pub use client::{ConnectionType, Method, PluginClient};
pub use location::{Location, LocationType};
