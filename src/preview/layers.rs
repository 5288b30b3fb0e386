//! Base/overlay layering and the single publication point
//!
//! Every state change builds a new [`Layers`] value and swaps the shared
//! `Arc` in one step. Readers clone the `Arc` and work on that snapshot, so a
//! reader sees either the old layers or the new ones, never a mix.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, info};

use super::cache::BaseCache;
use super::session::RenderSession;
use super::types::Artifact;

/// The opened file: its render session plus the caches filled from it
pub struct FileLayer {
    pub session: RenderSession,
    pub base: BaseCache,
    pub thumbnails: BaseCache,
}

impl FileLayer {
    #[must_use]
    pub fn new(session: RenderSession, base_capacity: usize) -> Self {
        Self {
            session,
            base: BaseCache::new(base_capacity),
            thumbnails: BaseCache::new(base_capacity),
        }
    }

    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.session.page_count()
    }
}

/// Pages of the latest live-edit submission that differ from the base layer.
///
/// Immutable once published; the next diff pass builds a new one.
#[derive(Debug, Default)]
pub struct Overlay {
    total_pages: usize,
    pages: HashMap<usize, Artifact>,
    unrendered: BTreeSet<usize>,
}

impl Overlay {
    #[must_use]
    pub fn new(total_pages: usize) -> Self {
        Self {
            total_pages,
            ..Self::default()
        }
    }

    pub fn insert(&mut self, page: usize, artifact: Artifact) {
        self.unrendered.remove(&page);
        self.pages.insert(page, artifact);
    }

    /// Record a changed page whose render failed
    pub fn mark_unrendered(&mut self, page: usize) {
        self.pages.remove(&page);
        self.unrendered.insert(page);
    }

    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    #[must_use]
    pub fn get(&self, page: usize) -> Option<&Artifact> {
        self.pages.get(&page)
    }

    #[must_use]
    pub fn is_unrendered(&self, page: usize) -> bool {
        self.unrendered.contains(&page)
    }

    #[must_use]
    pub fn contains(&self, page: usize) -> bool {
        page < self.total_pages && (self.pages.contains_key(&page) || self.is_unrendered(page))
    }

    /// Number of pages carried by the overlay, rendered or not
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.pages.len() + self.unrendered.len()
    }
}

/// One consistent view of file, base and overlay
#[derive(Default)]
pub struct Layers {
    pub generation: u64,
    pub file: Option<Arc<FileLayer>>,
    pub overlay: Option<Arc<Overlay>>,
}

impl Layers {
    /// Total of the active layer: the overlay if one is published, else the file
    #[must_use]
    pub fn current_total_pages(&self) -> usize {
        match (&self.overlay, &self.file) {
            (Some(overlay), _) => overlay.total_pages(),
            (None, Some(file)) => file.total_pages(),
            (None, None) => 0,
        }
    }

    #[must_use]
    pub fn read_through_base(&self, page: usize) -> Option<Artifact> {
        self.file.as_ref()?.base.get(page)
    }

    /// Overlay first; base when there is no overlay, the page lies beyond it,
    /// or the overlay does not carry the page.
    #[must_use]
    pub fn read_through_overlay(&self, page: usize) -> Option<Artifact> {
        if let Some(overlay) = &self.overlay {
            if page < overlay.total_pages() {
                if let Some(artifact) = overlay.get(page) {
                    return Some(artifact.clone());
                }
                if overlay.is_unrendered(page) {
                    return None;
                }
            }
        }
        self.read_through_base(page)
    }
}

/// Holder of the published [`Layers`] snapshot
pub struct LayerStore {
    current: RwLock<Arc<Layers>>,
}

impl Default for LayerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Layers::default())),
        }
    }

    /// The currently published layers
    #[must_use]
    pub fn snapshot(&self) -> Arc<Layers> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Replace the file layer and drop any overlay. Starts a new generation.
    ///
    /// Returns the previous file layer so the caller decides when to close it.
    pub fn reset(&self, file: Option<Arc<FileLayer>>) -> (u64, Option<Arc<FileLayer>>) {
        self.swap(|old| {
            let next = Layers {
                generation: old.generation + 1,
                file,
                overlay: None,
            };
            let previous = old.file.clone();
            (next, (old.generation + 1, previous))
        })
    }

    /// Drop the file layer, keeping the overlay. Starts a new generation.
    pub fn detach_file(&self) -> Option<Arc<FileLayer>> {
        self.swap(|old| {
            let next = Layers {
                generation: old.generation + 1,
                file: None,
                overlay: old.overlay.clone(),
            };
            (next, old.file.clone())
        })
    }

    /// Atomically install `overlay` if `generation` is still current.
    ///
    /// Returns false (and leaves the layers untouched) for a stale result.
    pub fn publish(&self, generation: u64, overlay: Overlay) -> bool {
        let overlay = Arc::new(overlay);
        self.swap(|old| {
            if old.generation != generation {
                info!(
                    "Discarding diff result for generation {generation}, current is {}",
                    old.generation
                );
                return (Self::clone_layers(old), false);
            }
            debug!(
                "Publishing overlay: {} pages total, {} changed",
                overlay.total_pages(),
                overlay.changed_count()
            );
            let next = Layers {
                generation: old.generation,
                file: old.file.clone(),
                overlay: Some(overlay.clone()),
            };
            (next, true)
        })
    }

    /// Drop the overlay, reverting to the file-only view
    pub fn clear_overlay(&self) {
        self.swap(|old| {
            let next = Layers {
                generation: old.generation,
                file: old.file.clone(),
                overlay: None,
            };
            (next, ())
        });
    }

    #[must_use]
    pub fn current_total_pages(&self) -> usize {
        self.snapshot().current_total_pages()
    }

    #[must_use]
    pub fn read_through_base(&self, page: usize) -> Option<Artifact> {
        self.snapshot().read_through_base(page)
    }

    #[must_use]
    pub fn read_through_overlay(&self, page: usize) -> Option<Artifact> {
        self.snapshot().read_through_overlay(page)
    }

    fn clone_layers(layers: &Layers) -> Layers {
        Layers {
            generation: layers.generation,
            file: layers.file.clone(),
            overlay: layers.overlay.clone(),
        }
    }

    fn swap<R>(&self, f: impl FnOnce(&Layers) -> (Layers, R)) -> R {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let (next, result) = f(&current);
        *current = Arc::new(next);
        result
    }
}
