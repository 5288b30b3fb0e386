//! Cache coordinator - session lifecycle, diff passes and point reads

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};

use super::backend::RenderBackend;
use super::diff::DiffEngine;
use super::layers::{FileLayer, LayerStore};
use super::session::RenderSession;
use super::types::{Artifact, DocumentSource, PageUpdate, RenderSpec, RenderedPage};
use super::{DEFAULT_BASE_CAPACITY, PREVIEW_SCALE, THUMBNAIL_SCALE};

/// Rendering parameters shared by every session the coordinator opens
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CacheConfig {
    /// Resolution for page images; file and diff sessions both use it
    pub preview: RenderSpec,
    /// Resolution for thumbnails
    pub thumbnail: RenderSpec,
    /// Maximum pages kept in each base cache
    pub base_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            preview: RenderSpec::scale(PREVIEW_SCALE),
            thumbnail: RenderSpec::scale(THUMBNAIL_SCALE),
            base_capacity: DEFAULT_BASE_CAPACITY,
        }
    }
}

/// Which layers are currently active
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinatorState {
    Empty,
    FileOnly,
    FileWithPreview,
}

/// Keeps a viewer in sync with an opened file and its live-edit submissions.
///
/// Mutating operations (`open_session`, `close_session`, `diff_and_update`,
/// `clear_preview`) are serialized on one lock. Reads never take it: they work
/// on the last published layer snapshot.
pub struct CacheCoordinator {
    backend: Arc<dyn RenderBackend>,
    config: CacheConfig,
    layers: LayerStore,
    diff: DiffEngine,
    lifecycle: Mutex<()>,
}

impl CacheCoordinator {
    #[must_use]
    pub fn new(backend: Arc<dyn RenderBackend>, config: CacheConfig) -> Self {
        Self {
            backend,
            config,
            layers: LayerStore::new(),
            diff: DiffEngine::new(),
            lifecycle: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Open `source` as the file layer, dropping base, overlay and the
    /// previous session. Returns false if the document could not be opened;
    /// the coordinator is then empty.
    pub fn open_session(&self, source: DocumentSource) -> bool {
        let _guard = self.lock_lifecycle();

        let (_, previous) = self.layers.reset(None);
        close_file_layer(previous);

        match RenderSession::open(self.backend.clone(), source.clone()) {
            Ok(session) => {
                info!(
                    "Opened {source:?}: {} pages (session {})",
                    session.page_count(),
                    session.id()
                );
                let file = Arc::new(FileLayer::new(session, self.config.base_capacity));
                self.layers.reset(Some(file));
                true
            }
            Err(e) => {
                error!("Failed to open session for {source:?}: {e}");
                false
            }
        }
    }

    /// Close the file session. A published overlay stays until cleared.
    pub fn close_session(&self) {
        let _guard = self.lock_lifecycle();
        close_file_layer(self.layers.detach_file());
    }

    /// Render `edited` in a transient session, diff it against the base
    /// layer and publish the resulting overlay.
    ///
    /// Returns the page updates for the viewer; empty input, an unreadable
    /// document or a superseded file context all yield no updates.
    pub fn diff_and_update(&self, edited: &[u8]) -> Vec<PageUpdate> {
        if edited.is_empty() {
            debug!("Ignoring empty submission");
            return Vec::new();
        }
        let _guard = self.lock_lifecycle();

        let snapshot = self.layers.snapshot();
        let generation = snapshot.generation;
        let previous_total = snapshot.current_total_pages();

        let session =
            match RenderSession::open(self.backend.clone(), DocumentSource::bytes(edited)) {
                Ok(session) => session,
                Err(e) => {
                    error!("Failed to open edited document for diff: {e}");
                    return Vec::new();
                }
            };
        let pages = render_all(&session, self.config.preview);
        session.close();

        let base = snapshot.file.as_deref().map(|file| &file.base);
        let outcome = self
            .diff
            .diff(&pages, base, snapshot.overlay.as_deref(), previous_total);

        if !self.layers.publish(generation, outcome.overlay) {
            return Vec::new();
        }
        debug!(
            "Diff pass: {} pages, {} updates",
            pages.len(),
            outcome.updates.len()
        );
        outcome.updates
    }

    /// Drop the overlay and serve the file-only view again
    pub fn clear_preview(&self) {
        let _guard = self.lock_lifecycle();
        self.layers.clear_overlay();
    }

    /// Image for `page` from the active layers, rendering it from the file
    /// session into the base layer on a miss. Blocks while rendering.
    #[must_use]
    pub fn get_image_data(&self, page: usize) -> Option<Artifact> {
        let snapshot = self.layers.snapshot();
        if let Some(overlay) = &snapshot.overlay {
            if page >= overlay.total_pages() || overlay.is_unrendered(page) {
                return None;
            }
        }
        if let Some(artifact) = snapshot.read_through_overlay(page) {
            return Some(artifact);
        }

        let file = snapshot.file.clone()?;
        let artifact = file.session.render_blocking(page, self.config.preview)?;
        file.base.insert(page, artifact.clone());
        Some(artifact)
    }

    /// Non-blocking [`Self::get_image_data`].
    ///
    /// Cache hits and misses with nothing to render complete on the calling
    /// thread; renders complete on the file session's worker.
    pub fn get_image_data_async<F>(&self, page: usize, callback: F)
    where
        F: FnOnce(Option<Artifact>) + Send + 'static,
    {
        let snapshot = self.layers.snapshot();
        if let Some(overlay) = &snapshot.overlay {
            if page >= overlay.total_pages() || overlay.is_unrendered(page) {
                callback(None);
                return;
            }
        }
        if let Some(artifact) = snapshot.read_through_overlay(page) {
            callback(Some(artifact));
            return;
        }
        let Some(file) = snapshot.file.clone() else {
            callback(None);
            return;
        };

        let target = file.clone();
        file.session
            .render_async(page, self.config.preview, move |artifact| {
                if let Some(artifact) = &artifact {
                    target.base.insert(page, artifact.clone());
                }
                callback(artifact);
            });
    }

    /// Thumbnail of a page of the opened file
    #[must_use]
    pub fn get_thumbnail(&self, page: usize) -> Option<Artifact> {
        let snapshot = self.layers.snapshot();
        if page >= snapshot.current_total_pages() {
            return None;
        }
        let file = snapshot.file.clone()?;
        if let Some(cached) = file.thumbnails.get(page) {
            return Some(cached);
        }

        let artifact = file.session.render_blocking(page, self.config.thumbnail)?;
        file.thumbnails.insert(page, artifact.clone());
        Some(artifact)
    }

    /// Page count of the overlay if one is published, else of the file
    #[must_use]
    pub fn get_current_total_pages(&self) -> usize {
        self.layers.current_total_pages()
    }

    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        let snapshot = self.layers.snapshot();
        match (&snapshot.file, &snapshot.overlay) {
            (_, Some(_)) => CoordinatorState::FileWithPreview,
            (Some(_), None) => CoordinatorState::FileOnly,
            (None, None) => CoordinatorState::Empty,
        }
    }

    /// Bumped by every open and close
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.layers.generation()
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CacheCoordinator {
    fn drop(&mut self) {
        close_file_layer(self.layers.snapshot().file.clone());
    }
}

fn close_file_layer(file: Option<Arc<FileLayer>>) {
    if let Some(file) = file {
        debug!("Closing file session {}", file.session.id());
        file.session.close();
        file.base.invalidate_all();
        file.thumbnails.invalidate_all();
    }
}

/// Queue every page on `session` and wait for all of them, in page order.
/// A page whose render fails or never completes keeps its display size but
/// has no artifact.
fn render_all(session: &RenderSession, spec: RenderSpec) -> Vec<RenderedPage> {
    let total = session.page_count();
    let (tx, rx) = flume::unbounded();

    for page in 0..total {
        let tx = tx.clone();
        session.render_async(page, spec, move |artifact| {
            let _ = tx.send((page, artifact));
        });
    }
    drop(tx);

    let mut artifacts = vec![None; total];
    for (page, artifact) in rx.iter() {
        artifacts[page] = artifact;
    }

    artifacts
        .into_iter()
        .enumerate()
        .map(|(page, artifact)| match artifact {
            Some(artifact) => RenderedPage::rendered(artifact),
            None => {
                warn!("Page {page} of the edited document failed to render");
                RenderedPage::failed(session.page_size_blocking(page).unwrap_or_default())
            }
        })
        .collect()
}
