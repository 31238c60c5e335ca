//! Minimal component-version model crossing the plugin boundary.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Extra identity attributes of a resource beyond its name and version.
pub type Identity = BTreeMap<String, String>;

/// Credentials passed to plugins, attribute name to secret value.
pub type Credentials = BTreeMap<String, String>;

/// A label attached to a component version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: serde_json::Value,
}

/// The descriptor a repository returns for one component version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentVersionDescriptor {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
}

impl ComponentVersionDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            provider: None,
            labels: Vec::new(),
        }
    }
}

impl fmt::Display for ComponentVersionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}
