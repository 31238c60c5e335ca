//! Layout-to-store copy.
//!
//! Transfers every blob of a [`LayoutStore`] into a [`ContentSink`] in
//! dependency order, then resolves and returns the root artifact so callers
//! can tag it in the destination.

use std::collections::HashSet;

use async_trait::async_trait;
use oci_spec::image::{Descriptor, DescriptorBuilder, MediaType};

use ocmr_core::error::{OcmError, Result};

use super::digest::digest_bytes;
use super::reader::LayoutStore;

/// Destination for blob uploads.
#[async_trait]
pub trait ContentSink: Send + Sync {
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool>;
    async fn push(&self, descriptor: &Descriptor, data: Vec<u8>) -> Result<()>;
    async fn tag(&self, descriptor: &Descriptor, reference: &str) -> Result<()>;
}

/// Copy every blob of `store` into `sink`, successors first, and return the
/// root artifact descriptor.
///
/// Blobs the sink already holds are skipped. A layout with a single
/// top-level entry uses that entry as the root, with its original bytes
/// untouched. A layout with multiple top-level entries gets a synthetic
/// index pushed on top so a single descriptor can represent the whole
/// upload. `mutate_root` runs on the root descriptor before any blob
/// moves; annotations do not participate in the digest, so mutation
/// never diverges from the pushed content.
pub async fn copy_layout_with_index<S, F>(
    store: &LayoutStore,
    sink: &S,
    mutate_root: F,
) -> Result<Descriptor>
where
    S: ContentSink + ?Sized,
    F: FnOnce(&mut Descriptor),
{
    let candidates = store.index().manifests();
    if candidates.is_empty() {
        return Err(OcmError::LayoutError(
            "layout has no top-level artifacts".to_string(),
        ));
    }

    let mut visited = HashSet::new();
    let mut order = Vec::new();
    for candidate in candidates {
        plan_copy(store, candidate, &mut visited, &mut order)?;
    }

    // The root is fixed, and the caller's mutation applied, before any
    // blob moves.
    let (pushed_root, synthetic_index) = if candidates.len() == 1 {
        (candidates[0].clone(), None)
    } else {
        // Multiple roots are wrapped in a fresh index so the destination
        // sees a single entry point.
        let index_data = serde_json::to_vec(store.index()).map_err(|e| {
            OcmError::LayoutError(format!("failed to serialize synthetic index: {}", e))
        })?;
        let descriptor = DescriptorBuilder::default()
            .media_type(MediaType::ImageIndex)
            .digest(digest_bytes(&index_data))
            .size(index_data.len() as i64)
            .build()
            .map_err(|e| {
                OcmError::LayoutError(format!("failed to build index descriptor: {}", e))
            })?;
        (descriptor, Some(index_data))
    };
    let mut root = pushed_root.clone();
    mutate_root(&mut root);

    for descriptor in &order {
        if sink.exists(descriptor).await? {
            tracing::debug!(digest = %descriptor.digest(), "blob already present, skipping");
            continue;
        }
        let data = store.fetch(descriptor.digest())?.to_vec();
        sink.push(descriptor, data).await?;
    }

    if let Some(index_data) = synthetic_index {
        if !sink.exists(&pushed_root).await? {
            sink.push(&pushed_root, index_data).await?;
        }
    }

    Ok(root)
}

/// Post-order descriptor walk. Successors land in `order` before their
/// referrer, so the sink never sees a manifest whose blobs are missing.
fn plan_copy(
    store: &LayoutStore,
    descriptor: &Descriptor,
    visited: &mut HashSet<String>,
    order: &mut Vec<Descriptor>,
) -> Result<()> {
    if !visited.insert(descriptor.digest().to_string()) {
        return Ok(());
    }
    for successor in store.successors(descriptor)? {
        plan_copy(store, &successor, visited, order)?;
    }
    if store.exists(descriptor.digest()) {
        order.push(descriptor.clone());
    }
    Ok(())
}

/// In-memory sink used by tests and local transfers.
#[derive(Default)]
pub struct MemorySink {
    state: std::sync::Mutex<MemorySinkState>,
}

#[derive(Default)]
struct MemorySinkState {
    blobs: std::collections::HashMap<String, Vec<u8>>,
    /// (reference, digest) pairs in tag order
    tags: Vec<(String, String)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.state.lock().unwrap().blobs.contains_key(digest)
    }

    pub fn blob(&self, digest: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().blobs.get(digest).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().tags.clone()
    }
}

#[async_trait]
impl ContentSink for MemorySink {
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        Ok(self.contains(descriptor.digest()))
    }

    async fn push(&self, descriptor: &Descriptor, data: Vec<u8>) -> Result<()> {
        let actual = digest_bytes(&data);
        if &actual != descriptor.digest() {
            return Err(OcmError::DigestMismatch {
                expected: descriptor.digest().to_string(),
                actual,
            });
        }
        self.state
            .lock()
            .unwrap()
            .blobs
            .insert(actual, data);
        Ok(())
    }

    async fn tag(&self, descriptor: &Descriptor, reference: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .tags
            .push((reference.to_string(), descriptor.digest().to_string()));
        Ok(())
    }
}
