use thiserror::Error;

/// OCM runtime error types
#[derive(Error, Debug)]
pub enum OcmError {
    /// RPC transport failure (connection, non-2xx status, decode)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Plugin process lifecycle failure
    #[error("Plugin error: {plugin} - {message}")]
    PluginError { plugin: String, message: String },

    /// Capability registry failure
    #[error("Registry error: {0}")]
    RegistryError(String),

    /// A type, plugin, or blob that was never registered/pushed
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON Schema compilation or validation failure
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// OCI layout archive failure
    #[error("Layout error: {0}")]
    LayoutError(String),

    /// Content does not hash to its declared digest
    #[error("Digest mismatch for {expected}: got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Operation not supported by this store/writer
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for OcmError {
    fn from(err: serde_json::Error) -> Self {
        OcmError::SerializationError(err.to_string())
    }
}

/// Result type alias for OCM runtime operations
pub type Result<T> = std::result::Result<T, OcmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let error = OcmError::TransportError("connection refused".to_string());
        assert_eq!(error.to_string(), "Transport error: connection refused");
    }

    #[test]
    fn test_plugin_error_display() {
        let error = OcmError::PluginError {
            plugin: "dummy-repo".to_string(),
            message: "did not announce an address".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Plugin error: dummy-repo - did not announce an address"
        );
    }

    #[test]
    fn test_digest_mismatch_display() {
        let error = OcmError::DigestMismatch {
            expected: "sha256:aaa".to_string(),
            actual: "sha256:bbb".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Digest mismatch for sha256:aaa: got sha256:bbb"
        );
    }

    #[test]
    fn test_not_found_display() {
        let error = OcmError::NotFound("DummyRepository/v1".to_string());
        assert_eq!(error.to_string(), "Not found: DummyRepository/v1");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: OcmError = io_error.into();
        assert!(matches!(err, OcmError::IoError(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> =
            serde_json::from_str("{ invalid json }");
        let err: OcmError = result.unwrap_err().into();
        assert!(matches!(err, OcmError::SerializationError(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        assert_eq!(returns_ok().unwrap(), 42);
    }
}
