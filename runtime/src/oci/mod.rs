//! OCI image layout codec.
//!
//! Serializes a content-addressed blob set plus index into a tar (optionally
//! gzip) stream, and parses such an archive back into a queryable read-only
//! store. Artifact bytes cross process and network boundaries as a single
//! archive blob in this format.

pub mod copy;
pub mod digest;
pub mod reader;
pub mod resolver;
pub mod writer;

pub use copy::{copy_layout_with_index, ContentSink, MemorySink};
pub use digest::{parse_digest, DigestReader};
pub use reader::LayoutStore;
pub use resolver::MemoryResolver;
pub use writer::{LayoutBlob, LayoutWriter};

use oci_spec::image::MediaType;

/// Annotation key carrying the human reference (tag) on an index entry.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Contents of the `oci-layout` marker file.
pub const OCI_LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

/// Media types that get auto-tagged by digest on push and are eligible as
/// top-level artifacts.
pub fn is_manifest_media_type(media_type: &MediaType) -> bool {
    matches!(
        media_type,
        MediaType::ImageManifest | MediaType::ImageIndex
    ) || matches!(
        media_type,
        MediaType::Other(s)
            if s == "application/vnd.docker.distribution.manifest.v2+json"
                || s == "application/vnd.docker.distribution.manifest.list.v2+json"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_media_types() {
        assert!(is_manifest_media_type(&MediaType::ImageManifest));
        assert!(is_manifest_media_type(&MediaType::ImageIndex));
        assert!(is_manifest_media_type(&MediaType::Other(
            "application/vnd.docker.distribution.manifest.v2+json".to_string()
        )));
        assert!(!is_manifest_media_type(&MediaType::ImageLayerGzip));
        assert!(!is_manifest_media_type(&MediaType::ImageConfig));
    }
}
