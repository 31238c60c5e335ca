//! JSON Schema validation of typed plugin payloads.

use jsonschema::{Draft, JSONSchema};
use serde::Serialize;

use ocmr_core::error::{OcmError, Result};

/// Validate a typed value against a capability's declared JSON Schema.
///
/// Returns `Ok(true)` when the value conforms, `Ok(false)` without an error
/// when the value serializes to a bare string (a prototype that is not an
/// object cannot meaningfully satisfy an object schema), and an error for
/// schema compilation failures or validation failures. Validation errors
/// embed the pretty-printed value and schema for diagnosis.
pub fn validate_plugin<T: Serialize>(value: &T, schema_bytes: &[u8]) -> Result<bool> {
    let schema: serde_json::Value = serde_json::from_slice(schema_bytes)
        .map_err(|e| OcmError::SchemaError(format!("failed to parse schema: {}", e)))?;

    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft202012)
        .compile(&schema)
        .map_err(|e| OcmError::SchemaError(format!("failed to compile schema: {}", e)))?;

    let instance = serde_json::to_value(value)
        .map_err(|e| OcmError::SchemaError(format!("failed to encode value: {}", e)))?;
    if instance.is_string() {
        return Ok(false);
    }

    if let Err(errors) = compiled.validate(&instance) {
        let detail: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(OcmError::SchemaError(format!(
            "value does not conform to schema: {}\nvalue: {}\nschema: {}",
            detail.join("; "),
            serde_json::to_string_pretty(&instance).unwrap_or_default(),
            serde_json::to_string_pretty(&schema).unwrap_or_default(),
        )));
    }

    Ok(true)
}
