//! OCI layout archive reader.
//!
//! Parses a tar (optionally gzip) layout stream into a random-access,
//! read-only content store plus a decoded top-level index.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};

use flate2::read::GzDecoder;
use oci_spec::image::{Descriptor, ImageIndex, ImageManifest, MediaType};

use ocmr_core::error::{OcmError, Result};

use super::digest::digest_bytes;

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Read-only content store built from a layout archive.
pub struct LayoutStore {
    /// digest -> blob bytes
    blobs: HashMap<String, Vec<u8>>,
    index: ImageIndex,
}

impl LayoutStore {
    /// Parse a layout archive from `reader`.
    ///
    /// The first two bytes are sniffed for the gzip magic and re-chained so
    /// nothing is lost. When the source reports a known size the stream is
    /// bounded to exactly that size, so trailing garbage from an
    /// over-reading transport never reaches the tar parser. Sources smaller
    /// than two bytes fail fast.
    pub fn from_reader(mut reader: impl Read, declared_size: Option<u64>) -> Result<Self> {
        let mut magic = [0u8; 2];
        reader.read_exact(&mut magic).map_err(|e| {
            OcmError::LayoutError(format!("source smaller than two bytes: {}", e))
        })?;

        let restored = Cursor::new(magic).chain(reader);
        let bounded: Box<dyn Read> = match declared_size {
            Some(size) => Box::new(restored.take(size)),
            None => Box::new(restored),
        };

        if magic == GZIP_MAGIC {
            Self::from_tar(GzDecoder::new(bounded))
        } else {
            Self::from_tar(bounded)
        }
    }

    fn from_tar(reader: impl Read) -> Result<Self> {
        let mut archive = tar::Archive::new(reader);
        let mut blobs = HashMap::new();
        let mut index: Option<ImageIndex> = None;

        let entries = archive.entries().map_err(|e| {
            OcmError::LayoutError(format!("failed to parse layout archive: {}", e))
        })?;
        for entry in entries {
            let mut entry = entry.map_err(|e| {
                OcmError::LayoutError(format!("failed to read archive entry: {}", e))
            })?;
            let path = entry
                .path()
                .map_err(|e| {
                    OcmError::LayoutError(format!("invalid entry path: {}", e))
                })?
                .to_string_lossy()
                .into_owned();

            if path == "index.json" {
                let mut data = Vec::new();
                entry.read_to_end(&mut data).map_err(|e| {
                    OcmError::LayoutError(format!("failed to read index.json: {}", e))
                })?;
                index = Some(serde_json::from_slice(&data).map_err(|e| {
                    OcmError::LayoutError(format!("failed to parse index.json: {}", e))
                })?);
                continue;
            }

            // blobs/<algorithm>/<encoded>
            let mut parts = path.split('/');
            if parts.next() != Some("blobs") {
                // oci-layout marker and anything else is skipped.
                continue;
            }
            let (algorithm, encoded) = match (parts.next(), parts.next()) {
                (Some(a), Some(e)) if parts.next().is_none() => (a.to_string(), e.to_string()),
                _ => continue,
            };

            let mut data = Vec::new();
            entry.read_to_end(&mut data).map_err(|e| {
                OcmError::LayoutError(format!("failed to read blob {}: {}", path, e))
            })?;

            let digest = format!("{}:{}", algorithm, encoded);
            if algorithm == "sha256" {
                let actual = digest_bytes(&data);
                if actual != digest {
                    return Err(OcmError::DigestMismatch {
                        expected: digest,
                        actual,
                    });
                }
            }
            blobs.insert(digest, data);
        }

        let index = index.ok_or_else(|| {
            OcmError::LayoutError("layout archive has no index.json".to_string())
        })?;

        Ok(Self { blobs, index })
    }

    /// The archive's decoded top-level index.
    pub fn index(&self) -> &ImageIndex {
        &self.index
    }

    pub fn exists(&self, digest: &str) -> bool {
        self.blobs.contains_key(digest)
    }

    /// Fetch a blob by digest.
    pub fn fetch(&self, digest: &str) -> Result<&[u8]> {
        self.blobs
            .get(digest)
            .map(|b| b.as_slice())
            .ok_or_else(|| OcmError::NotFound(format!("blob {} not in layout", digest)))
    }

    /// Digests of all blobs in the archive.
    pub fn digests(&self) -> Vec<String> {
        let mut digests: Vec<String> = self.blobs.keys().cloned().collect();
        digests.sort();
        digests
    }

    /// Direct successors of a descriptor: for an index its manifests, for a
    /// manifest its config plus layers. Unknown media types have none.
    pub fn successors(&self, descriptor: &Descriptor) -> Result<Vec<Descriptor>> {
        let data = match self.blobs.get(descriptor.digest().as_str()) {
            Some(data) => data,
            // Referenced but not shipped in this archive; nothing to walk.
            None => return Ok(Vec::new()),
        };

        match media_kind(descriptor.media_type()) {
            MediaKind::Index => {
                let index: ImageIndex = serde_json::from_slice(data).map_err(|e| {
                    OcmError::LayoutError(format!(
                        "failed to parse index {}: {}",
                        descriptor.digest(),
                        e
                    ))
                })?;
                Ok(index.manifests().clone())
            }
            MediaKind::Manifest => {
                let manifest: ImageManifest = serde_json::from_slice(data).map_err(|e| {
                    OcmError::LayoutError(format!(
                        "failed to parse manifest {}: {}",
                        descriptor.digest(),
                        e
                    ))
                })?;
                let mut successors = vec![manifest.config().clone()];
                successors.extend(manifest.layers().iter().cloned());
                Ok(successors)
            }
            MediaKind::Other => Ok(Vec::new()),
        }
    }

    /// Top-level artifacts: index entries not referenced as a successor by
    /// any other index entry.
    ///
    /// When the original reference used to produce the layout is unknown,
    /// this identifies the "real" root artifact(s). A single candidate is
    /// trivially the result; otherwise every candidate's successor set is
    /// computed and unioned, and candidates absent from that union win.
    pub fn main_artifacts(&self) -> Result<Vec<Descriptor>> {
        let candidates = self.index.manifests();
        if candidates.len() <= 1 {
            return Ok(candidates.clone());
        }

        let mut referenced: HashSet<String> = HashSet::new();
        for candidate in candidates {
            for successor in self.successors(candidate)? {
                referenced.insert(successor.digest().to_string());
            }
        }

        Ok(candidates
            .iter()
            .filter(|c| !referenced.contains(c.digest().as_str()))
            .cloned()
            .collect())
    }
}

enum MediaKind {
    Index,
    Manifest,
    Other,
}

fn media_kind(media_type: &MediaType) -> MediaKind {
    match media_type {
        MediaType::ImageIndex => MediaKind::Index,
        MediaType::ImageManifest => MediaKind::Manifest,
        MediaType::Other(s)
            if s == "application/vnd.docker.distribution.manifest.list.v2+json" =>
        {
            MediaKind::Index
        }
        MediaType::Other(s) if s == "application/vnd.docker.distribution.manifest.v2+json" => {
            MediaKind::Manifest
        }
        _ => MediaKind::Other,
    }
}
