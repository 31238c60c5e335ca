//! Wire type identification and the runtime type scheme.
//!
//! Every payload crossing the plugin boundary carries a `Type` tag, a
//! name/version pair under the serialized `"type"` field. A `Scheme` maps
//! those tags to concrete Rust types so registries can resolve a typed
//! specification both by its wire tag and by its concrete Rust type.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{OcmError, Result};

/// A (name, version) pair identifying a capability's wire schema.
///
/// The canonical string form is `name/version`; the unversioned alias form
/// is just `name`. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Type {
    name: String,
    version: String,
}

impl Type {
    /// Create a versioned type.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Create an unversioned alias form.
    pub fn unversioned(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
        }
    }

    /// Type name without the version.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version component; empty for the unversioned alias form.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// True when the type carries no name at all (an untyped specification).
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.name, self.version)
        }
    }
}

impl FromStr for Type {
    type Err = OcmError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(OcmError::Other("empty type string".to_string()));
        }
        match s.split_once('/') {
            Some((name, version)) => Ok(Self::new(name, version)),
            None => Ok(Self::unversioned(s)),
        }
    }
}

impl Serialize for Type {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A value that carries a wire type tag.
pub trait Typed: Serialize + DeserializeOwned {
    /// The wire type tag this value carries.
    fn typ(&self) -> Type;
}

struct SchemeEntry {
    /// Produces a zero value (with the type tag set) as generic JSON.
    prototype: fn() -> serde_json::Value,
    /// Aliases registered for this type, canonical form excluded.
    aliases: Vec<Type>,
}

#[derive(Default)]
struct SchemeState {
    entries: HashMap<Type, SchemeEntry>,
    /// alias -> canonical
    alias_index: HashMap<Type, Type>,
    /// concrete Rust type -> canonical wire type
    rust_index: HashMap<TypeId, Type>,
}

/// Registry mapping wire `Type`s to prototype values and their aliases.
///
/// Created once per registry instance; mutated only during registration at
/// startup, read concurrently thereafter. The interior lock exists to keep
/// the registration API safe, not because steady-state access contends.
#[derive(Default)]
pub struct Scheme {
    state: RwLock<SchemeState>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a concrete Rust type under a wire type, with the
    /// unversioned form of the name as an implicit alias.
    pub fn register<T>(&self, typ: Type) -> Result<()>
    where
        T: Typed + Default + 'static,
    {
        if typ.is_empty() {
            return Err(OcmError::ConfigError(
                "cannot register a type without a name".to_string(),
            ));
        }
        let mut state = self
            .state
            .write()
            .map_err(|_| OcmError::Other("scheme lock poisoned".to_string()))?;
        if state.entries.contains_key(&typ) {
            return Err(OcmError::ConfigError(format!(
                "type {} is already registered",
                typ
            )));
        }

        let alias = Type::unversioned(typ.name());
        let aliases = if alias == typ { vec![] } else { vec![alias.clone()] };
        for a in &aliases {
            state.alias_index.insert(a.clone(), typ.clone());
        }
        state.rust_index.insert(TypeId::of::<T>(), typ.clone());
        state.entries.insert(
            typ,
            SchemeEntry {
                prototype: || {
                    serde_json::to_value(T::default()).unwrap_or(serde_json::Value::Null)
                },
                aliases,
            },
        );
        Ok(())
    }

    /// Register an additional alias for an already-registered type.
    pub fn register_alias(&self, alias: Type, canonical: &Type) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| OcmError::Other("scheme lock poisoned".to_string()))?;
        let entry = state.entries.get_mut(canonical).ok_or_else(|| {
            OcmError::NotFound(format!("type {} is not registered", canonical))
        })?;
        entry.aliases.push(alias.clone());
        state.alias_index.insert(alias, canonical.clone());
        Ok(())
    }

    /// Resolve a (possibly aliased) wire type to its canonical form.
    pub fn canonical(&self, typ: &Type) -> Option<Type> {
        let state = self.state.read().ok()?;
        if state.entries.contains_key(typ) {
            return Some(typ.clone());
        }
        state.alias_index.get(typ).cloned()
    }

    /// Canonical wire type registered for the concrete Rust type `T`.
    pub fn type_for<T: 'static>(&self) -> Option<Type> {
        let state = self.state.read().ok()?;
        state.rust_index.get(&TypeId::of::<T>()).cloned()
    }

    /// All aliases registered for a canonical type (canonical form excluded).
    pub fn aliases(&self, typ: &Type) -> Vec<Type> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.entries.get(typ).map(|e| e.aliases.clone()))
            .unwrap_or_default()
    }

    /// Construct a zero value for a registered type as generic JSON.
    pub fn new_value(&self, typ: &Type) -> Result<serde_json::Value> {
        let canonical = self
            .canonical(typ)
            .ok_or_else(|| OcmError::NotFound(format!("type {} is not registered", typ)))?;
        let state = self
            .state
            .read()
            .map_err(|_| OcmError::Other("scheme lock poisoned".to_string()))?;
        let entry = state
            .entries
            .get(&canonical)
            .ok_or_else(|| OcmError::NotFound(format!("type {} is not registered", typ)))?;
        Ok((entry.prototype)())
    }

    /// Convert a generic JSON value into a concrete typed struct.
    pub fn convert<T: Typed>(&self, value: &serde_json::Value) -> Result<T> {
        serde_json::from_value(value.clone()).map_err(|e| {
            OcmError::SerializationError(format!("failed to convert typed value: {}", e))
        })
    }

    /// All canonical types registered in this scheme.
    pub fn types(&self) -> Vec<Type> {
        self.state
            .read()
            .map(|s| s.entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}
