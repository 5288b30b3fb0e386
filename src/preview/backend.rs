//! Rendering backend seam
//!
//! The cache never decodes documents itself. A [`RenderBackend`] opens a
//! [`DocumentHandle`] on the session's worker thread, and that handle is only
//! ever touched from that thread, so it does not need to be `Send`.

use super::request::WorkerFault;
use super::types::{DocumentSource, PageSize, RenderSpec};

/// Factory for document handles
pub trait RenderBackend: Send + Sync {
    /// Open a document. Called on the worker thread that will own the handle.
    fn open(&self, source: &DocumentSource) -> Result<Box<dyn DocumentHandle>, WorkerFault>;
}

/// An opened document. Dropping it releases the backend resources.
pub trait DocumentHandle {
    fn page_count(&self) -> usize;

    /// Display size in points with rotation normalized
    fn page_size(&self, index: usize) -> Result<PageSize, WorkerFault>;

    /// Encoded image bytes for one page
    fn render_page(&self, index: usize, spec: &RenderSpec) -> Result<Vec<u8>, WorkerFault>;
}
