//! Streaming OCI layout writer.
//!
//! Serializes a content-addressed blob set plus index/manifest metadata into
//! a tar (optionally gzip) stream. Tar has no random access, so pushes are
//! strictly serialized through the writer lock; the index keeps its own lock
//! so tag queries never wait on an active push. This trades write
//! concurrency for not having to stage a layout directory on disk and re-tar
//! it afterwards.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use flate2::write::GzEncoder;
use flate2::Compression;
use oci_spec::image::{Descriptor, DescriptorBuilder, ImageIndex, ImageIndexBuilder, MediaType};

use ocmr_core::error::{OcmError, Result};

use super::digest::{parse_digest, DigestReader};
use super::resolver::MemoryResolver;
use super::{is_manifest_media_type, ANNOTATION_REF_NAME, OCI_LAYOUT_CONTENT};

enum CompressionSink<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

impl<W: Write> CompressionSink<W> {
    fn finish(self) -> std::io::Result<W> {
        match self {
            Self::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            }
            Self::Gzip(encoder) => {
                let mut w = encoder.finish()?;
                w.flush()?;
                Ok(w)
            }
        }
    }
}

impl<W: Write> Write for CompressionSink<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
        }
    }
}

struct TarState<W: Write> {
    builder: Option<tar::Builder<CompressionSink<W>>>,
    finished: Option<W>,
    closed: bool,
}

struct IndexState {
    /// digest -> descriptor for every successful push
    pushed: HashMap<String, Descriptor>,
    resolver: MemoryResolver,
    index: ImageIndex,
}

/// Write-only streaming sink producing an OCI layout archive.
///
/// Lifecycle: accepting pushes/tags until `close`, which flushes
/// `index.json` and the `oci-layout` marker and finalizes the tar stream.
/// A closed writer rejects further pushes.
pub struct LayoutWriter<W: Write> {
    tar: Mutex<TarState<W>>,
    index: Mutex<IndexState>,
}

fn empty_index() -> ImageIndex {
    // schemaVersion is fixed at 2 for compatibility. All required fields
    // are set, so build cannot fail.
    ImageIndexBuilder::default()
        .schema_version(2u32)
        .media_type(MediaType::ImageIndex)
        .manifests(Vec::new())
        .build()
        .expect("empty index is always buildable")
}

impl<W: Write> LayoutWriter<W> {
    /// Plain tar output.
    pub fn new(sink: W) -> Self {
        Self::with_sink(CompressionSink::Plain(sink))
    }

    /// Gzip-compressed tar output.
    pub fn new_gzip(sink: W) -> Self {
        Self::with_sink(CompressionSink::Gzip(GzEncoder::new(
            sink,
            Compression::default(),
        )))
    }

    fn with_sink(sink: CompressionSink<W>) -> Self {
        Self {
            tar: Mutex::new(TarState {
                builder: Some(tar::Builder::new(sink)),
                finished: None,
                closed: false,
            }),
            index: Mutex::new(IndexState {
                pushed: HashMap::new(),
                resolver: MemoryResolver::new(),
                index: empty_index(),
            }),
        }
    }

    /// Write a blob as a tar entry at `blobs/<algorithm>/<encoded>`.
    ///
    /// The stream is recomputed while copying; a digest or size mismatch
    /// against the descriptor fails the push and the blob is not recorded
    /// as existing. Manifest and index media types are auto-tagged by their
    /// own digest.
    pub fn push(&self, descriptor: &Descriptor, reader: impl Read) -> Result<()> {
        let digest = descriptor.digest().to_string();
        let (algorithm, encoded) = parse_digest(&digest);
        let size = descriptor.size() as u64;

        {
            let mut tar = self
                .tar
                .lock()
                .map_err(|_| OcmError::Other("layout writer lock poisoned".to_string()))?;
            if tar.closed {
                return Err(OcmError::LayoutError(
                    "cannot push to a closed layout writer".to_string(),
                ));
            }
            let builder = tar.builder.as_mut().ok_or_else(|| {
                OcmError::LayoutError("layout writer already finalized".to_string())
            })?;

            let mut header = tar::Header::new_gnu();
            header.set_size(size);
            header.set_mode(0o644);

            let mut verified = DigestReader::new(reader.take(size));
            builder
                .append_data(
                    &mut header,
                    format!("blobs/{}/{}", algorithm, encoded),
                    &mut verified,
                )
                .map_err(|e| {
                    OcmError::LayoutError(format!("failed to write blob {}: {}", digest, e))
                })?;
            verified.verify(&digest, size)?;
        }

        {
            let mut index = self
                .index
                .lock()
                .map_err(|_| OcmError::Other("layout index lock poisoned".to_string()))?;
            index.pushed.insert(digest.clone(), descriptor.clone());
        }

        if is_manifest_media_type(descriptor.media_type()) {
            self.tag(descriptor, &digest)?;
        }

        Ok(())
    }

    /// Whether a descriptor was successfully pushed to this writer.
    pub fn exists(&self, descriptor: &Descriptor) -> bool {
        self.index
            .lock()
            .map(|state| state.pushed.contains_key(descriptor.digest()))
            .unwrap_or(false)
    }

    /// This is a write-only streaming sink, not a random-access store.
    pub fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        Err(OcmError::Unsupported(format!(
            "layout writer cannot fetch {}; it is a write-only sink",
            descriptor.digest()
        )))
    }

    /// Record `reference` for a previously pushed descriptor and rebuild
    /// the index.
    pub fn tag(&self, descriptor: &Descriptor, reference: &str) -> Result<()> {
        if reference.is_empty() {
            return Err(OcmError::LayoutError(
                "reference must not be empty".to_string(),
            ));
        }

        let mut state = self
            .index
            .lock()
            .map_err(|_| OcmError::Other("layout index lock poisoned".to_string()))?;
        if !state.pushed.contains_key(descriptor.digest()) {
            return Err(OcmError::NotFound(format!(
                "descriptor {} was never pushed",
                descriptor.digest()
            )));
        }

        state.resolver.tag(descriptor, reference);
        if reference != descriptor.digest() {
            // The digest itself always resolves too.
            state.resolver.tag(descriptor, descriptor.digest());
        }
        state.index = rebuild_index(&state.resolver)?;
        Ok(())
    }

    /// All references recorded so far, in sorted order. Does not take the
    /// writer lock, so it never waits on an active push.
    pub fn tags(&self) -> Vec<String> {
        self.index
            .lock()
            .map(|state| state.resolver.references())
            .unwrap_or_default()
    }

    /// Snapshot of the current index.
    pub fn index(&self) -> ImageIndex {
        self.index
            .lock()
            .map(|state| state.index.clone())
            .unwrap_or_else(|_| empty_index())
    }

    /// Flush `index.json` and `oci-layout` and finalize the tar stream.
    ///
    /// Idempotent: a second call is a no-op and does not rewrite the
    /// archive.
    pub fn close(&self) -> Result<()> {
        let mut tar = self
            .tar
            .lock()
            .map_err(|_| OcmError::Other("layout writer lock poisoned".to_string()))?;
        if tar.closed {
            return Ok(());
        }

        let index_json = {
            let state = self
                .index
                .lock()
                .map_err(|_| OcmError::Other("layout index lock poisoned".to_string()))?;
            serde_json::to_vec(&state.index)?
        };

        let builder = tar.builder.as_mut().ok_or_else(|| {
            OcmError::LayoutError("layout writer already finalized".to_string())
        })?;
        append_file(builder, "index.json", &index_json)?;
        append_file(builder, "oci-layout", OCI_LAYOUT_CONTENT.as_bytes())?;

        let builder = tar
            .builder
            .take()
            .ok_or_else(|| OcmError::LayoutError("layout writer already finalized".to_string()))?;
        let sink = builder.into_inner().map_err(|e| {
            OcmError::LayoutError(format!("failed to finalize layout archive: {}", e))
        })?;
        let inner = sink.finish().map_err(|e| {
            OcmError::LayoutError(format!("failed to flush layout archive: {}", e))
        })?;

        tar.finished = Some(inner);
        tar.closed = true;
        Ok(())
    }

    /// Recover the underlying sink after `close`.
    pub fn into_inner(self) -> Result<W> {
        let tar = self
            .tar
            .into_inner()
            .map_err(|_| OcmError::Other("layout writer lock poisoned".to_string()))?;
        tar.finished.ok_or_else(|| {
            OcmError::LayoutError("layout writer was not closed".to_string())
        })
    }
}

fn append_file<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    data: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    builder.append_data(&mut header, path, data).map_err(|e| {
        OcmError::LayoutError(format!("failed to write {}: {}", path, e))
    })
}

/// Rebuild the index from the tag table.
///
/// Step 1: every descriptor with at least one non-digest reference gets one
/// index entry per reference, annotated with the ref name. Step 2: every
/// remaining descriptor referenced only by its own digest gets a single
/// entry with any stale ref-name annotation stripped. Iteration is in
/// digest order, references sorted, so the result is deterministic.
fn rebuild_index(resolver: &MemoryResolver) -> Result<ImageIndex> {
    let mut by_digest: BTreeMap<String, (Descriptor, Vec<String>)> = BTreeMap::new();
    for reference in resolver.references() {
        let descriptor = match resolver.resolve(&reference) {
            Some(d) => d,
            None => continue,
        };
        let digest = descriptor.digest().to_string();
        let entry = by_digest.entry(digest.clone()).or_insert((descriptor, Vec::new()));
        if reference != digest {
            entry.1.push(reference);
        }
    }

    let mut manifests = Vec::new();
    for (_, (descriptor, references)) in by_digest {
        if references.is_empty() {
            manifests.push(with_ref_annotation(&descriptor, None)?);
        } else {
            for reference in references {
                manifests.push(with_ref_annotation(&descriptor, Some(reference))?);
            }
        }
    }

    ImageIndexBuilder::default()
        .schema_version(2u32)
        .media_type(MediaType::ImageIndex)
        .manifests(manifests)
        .build()
        .map_err(|e| OcmError::LayoutError(format!("failed to build index: {}", e)))
}

/// Copy a descriptor, replacing (or stripping) its ref-name annotation.
fn with_ref_annotation(descriptor: &Descriptor, reference: Option<String>) -> Result<Descriptor> {
    let mut annotations: HashMap<String, String> = descriptor
        .annotations()
        .clone()
        .unwrap_or_default();
    match reference {
        Some(reference) => {
            annotations.insert(ANNOTATION_REF_NAME.to_string(), reference);
        }
        None => {
            annotations.remove(ANNOTATION_REF_NAME);
        }
    }

    let mut builder = DescriptorBuilder::default()
        .media_type(descriptor.media_type().clone())
        .digest(descriptor.digest().to_string())
        .size(descriptor.size());
    if let Some(platform) = descriptor.platform() {
        builder = builder.platform(platform.clone());
    }
    if !annotations.is_empty() {
        builder = builder.annotations(annotations);
    }
    builder
        .build()
        .map_err(|e| OcmError::LayoutError(format!("failed to rebuild descriptor: {}", e)))
}

/// A finished layout archive staged in an unlinked temp file.
///
/// The codec's producer side runs to completion before any consumer reads,
/// so an abandoned blob can never leave a producer task blocked on a pipe.
pub struct LayoutBlob {
    file: std::fs::File,
    size: u64,
}

impl LayoutBlob {
    /// Build an archive by driving `build` against a fresh writer, then
    /// stage the finished bytes for reading.
    pub fn build<F>(gzip: bool, build: F) -> Result<Self>
    where
        F: FnOnce(&LayoutWriter<std::fs::File>) -> Result<()>,
    {
        let file = tempfile::tempfile().map_err(OcmError::IoError)?;
        let writer = if gzip {
            LayoutWriter::new_gzip(file)
        } else {
            LayoutWriter::new(file)
        };
        build(&writer)?;
        writer.close()?;

        let mut file = writer.into_inner()?;
        let size = file.seek(SeekFrom::End(0)).map_err(OcmError::IoError)?;
        file.seek(SeekFrom::Start(0)).map_err(OcmError::IoError)?;
        Ok(Self { file, size })
    }

    /// Re-encode an existing layout store as an archive blob, carrying its
    /// blobs and index tags over unchanged.
    pub fn from_store(store: &crate::oci::LayoutStore, gzip: bool) -> Result<Self> {
        Self::build(gzip, |writer| {
            for digest in store.digests() {
                let data = store.fetch(&digest)?;
                let media_type = store
                    .index()
                    .manifests()
                    .iter()
                    .find(|d| d.digest() == &digest)
                    .map(|d| d.media_type().clone())
                    .unwrap_or(MediaType::Other(
                        "application/octet-stream".to_string(),
                    ));
                let descriptor = DescriptorBuilder::default()
                    .media_type(media_type)
                    .digest(digest.clone())
                    .size(data.len() as i64)
                    .build()
                    .map_err(|e| {
                        OcmError::LayoutError(format!("failed to build descriptor: {}", e))
                    })?;
                writer.push(&descriptor, data)?;
            }
            for entry in store.index().manifests() {
                if let Some(annotations) = entry.annotations() {
                    if let Some(reference) = annotations.get(ANNOTATION_REF_NAME) {
                        writer.tag(entry, reference)?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Archive size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Consume the blob, yielding a reader positioned at the start.
    pub fn into_reader(self) -> std::fs::File {
        self.file
    }
}
