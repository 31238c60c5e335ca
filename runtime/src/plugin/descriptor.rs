//! Plugin descriptors and the capability announcement wire format.

use std::collections::BTreeMap;
use std::path::PathBuf;

use base64::Engine;
use serde::{Deserialize, Serialize};

use ocmr_core::error::{OcmError, Result};
use ocmr_core::types::Type;
use ocmr_transport::ConnectionType;

/// The capability kinds a plugin can announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CapabilityKind {
    ComponentVersionRepository,
    BlobTransformer,
    ComponentLister,
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityKind::ComponentVersionRepository => write!(f, "componentVersionRepository"),
            CapabilityKind::BlobTransformer => write!(f, "blobTransformer"),
            CapabilityKind::ComponentLister => write!(f, "componentLister"),
        }
    }
}

/// One wire type a capability serves, with the JSON Schema its
/// specifications must satisfy, base64-encoded for transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclaredType {
    #[serde(rename = "type")]
    pub typ: Type,
    #[serde(rename = "jsonSchema")]
    pub json_schema: String,
}

impl DeclaredType {
    pub fn new(typ: Type, schema: &serde_json::Value) -> Result<Self> {
        let raw = serde_json::to_vec(schema)
            .map_err(|e| OcmError::SchemaError(format!("failed to encode schema: {}", e)))?;
        Ok(Self {
            typ,
            json_schema: base64::engine::general_purpose::STANDARD.encode(raw),
        })
    }

    /// Decode the base64 schema back to raw JSON bytes.
    pub fn schema_bytes(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.json_schema)
            .map_err(|e| OcmError::SchemaError(format!("failed to decode schema: {}", e)))
    }
}

/// What a plugin prints (or POSTs) to describe itself to the manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityAnnouncement {
    pub types: BTreeMap<CapabilityKind, Vec<DeclaredType>>,
}

impl CapabilityAnnouncement {
    pub fn declared(&self, kind: CapabilityKind) -> &[DeclaredType] {
        self.types.get(&kind).map(|t| t.as_slice()).unwrap_or(&[])
    }
}

/// Connection and lifecycle settings for one plugin binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    #[serde(rename = "pluginType")]
    pub kind: CapabilityKind,
    #[serde(rename = "idleTimeout", skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
}

/// A discovered but not yet started plugin binary.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub path: PathBuf,
    pub config: PluginConfig,
    pub types: BTreeMap<CapabilityKind, Vec<DeclaredType>>,
}

impl PluginDescriptor {
    pub fn new(path: impl Into<PathBuf>, config: PluginConfig) -> Self {
        Self {
            path: path.into(),
            config,
            types: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn with_announcement(mut self, announcement: CapabilityAnnouncement) -> Self {
        self.types = announcement.types;
        self
    }

    /// Wire types this plugin declares for `kind`.
    pub fn types_for(&self, kind: CapabilityKind) -> Vec<Type> {
        self.types
            .get(&kind)
            .map(|declared| declared.iter().map(|d| d.typ.clone()).collect())
            .unwrap_or_default()
    }

    /// The declared schema for a specific wire type under `kind`.
    pub fn schema_for(&self, kind: CapabilityKind, typ: &Type) -> Option<&DeclaredType> {
        self.types
            .get(&kind)?
            .iter()
            .find(|declared| declared.typ == *typ)
    }
}
