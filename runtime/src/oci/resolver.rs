//! In-memory tag table for layout writers.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use oci_spec::image::Descriptor;

#[derive(Default)]
struct ResolverState {
    /// reference string -> descriptor
    tags: HashMap<String, Descriptor>,
    /// digest -> references pointing at it (sorted for determinism)
    reverse: HashMap<String, BTreeSet<String>>,
}

/// Concurrency-safe reference table: reference string -> descriptor plus a
/// reverse digest -> tag-set map. Rebuilding the index before `Close` walks
/// this table.
#[derive(Default)]
pub struct MemoryResolver {
    state: RwLock<ResolverState>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `reference` as pointing at `descriptor`.
    pub fn tag(&self, descriptor: &Descriptor, reference: &str) {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        // A reference moves atomically: drop it from the digest it used to
        // point at before re-recording it.
        if let Some(previous) = state.tags.get(reference).map(|d| d.digest().to_string()) {
            if let Some(refs) = state.reverse.get_mut(&previous) {
                refs.remove(reference);
            }
        }
        state
            .reverse
            .entry(descriptor.digest().to_string())
            .or_default()
            .insert(reference.to_string());
        state.tags.insert(reference.to_string(), descriptor.clone());
    }

    /// Remove a reference. Returns true if it existed.
    pub fn untag(&self, reference: &str) -> bool {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        match state.tags.remove(reference) {
            Some(descriptor) => {
                let digest = descriptor.digest().to_string();
                if let Some(refs) = state.reverse.get_mut(&digest) {
                    refs.remove(reference);
                    if refs.is_empty() {
                        state.reverse.remove(&digest);
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Resolve a reference string to its descriptor.
    pub fn resolve(&self, reference: &str) -> Option<Descriptor> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.tags.get(reference).cloned())
    }

    /// All references pointing at a digest, in sorted order.
    pub fn references_for(&self, digest: &str) -> Vec<String> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.reverse.get(digest).map(|r| r.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// All reference strings, in sorted order.
    pub fn references(&self) -> Vec<String> {
        self.state
            .read()
            .map(|s| {
                let mut refs: Vec<String> = s.tags.keys().cloned().collect();
                refs.sort();
                refs
            })
            .unwrap_or_default()
    }
}
