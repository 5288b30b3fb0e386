//! Render request types and worker errors

use super::types::{Artifact, PageSize, RenderSpec};

/// Callback invoked with the result of a render job
pub type RenderCallback = Box<dyn FnOnce(Option<Artifact>) + Send + 'static>;

pub type SizeCallback = Box<dyn FnOnce(Option<PageSize>) + Send + 'static>;

/// Request sent to a session's render worker
pub enum RenderRequest {
    /// Render a page and hand the result to `reply`
    Page {
        page: usize,
        spec: RenderSpec,
        reply: RenderCallback,
    },

    /// Read a page's display size without rendering it
    PageSize { page: usize, reply: SizeCallback },

    /// Shutdown the worker
    Shutdown,
}

impl std::fmt::Debug for RenderRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Page { page, spec, .. } => f
                .debug_struct("Page")
                .field("page", page)
                .field("spec", spec)
                .finish_non_exhaustive(),
            Self::PageSize { page, .. } => f
                .debug_struct("PageSize")
                .field("page", page)
                .finish_non_exhaustive(),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Errors from the rendering backend
#[derive(Debug, thiserror::Error)]
pub enum WorkerFault {
    #[cfg(feature = "pdf")]
    #[error("PDF engine: {0}")]
    Pdf(#[from] mupdf::error::Error),

    #[error("page {page} out of range (document has {page_count})")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("encode: {0}")]
    Encode(String),

    #[error("{detail}")]
    Generic { detail: String },
}

impl WorkerFault {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }
}

/// Errors while bringing up a render session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to open document: {0}")]
    Open(#[source] WorkerFault),

    #[error("render worker exited before reporting the document")]
    WorkerGone,

    #[error("failed to spawn render worker: {0}")]
    Spawn(#[from] std::io::Error),
}
