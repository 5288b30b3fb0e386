//! Render worker - runs in the session's dedicated thread

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flume::{Receiver, Sender};
use log::{debug, warn};

use super::backend::{DocumentHandle, RenderBackend};
use super::request::{RenderRequest, WorkerFault};
use super::types::{Artifact, DocumentSource, RenderSpec};

/// Main worker function - owns the document handle for its whole life.
///
/// Reports the page count (or the open failure) on `opened` before serving
/// any request. Jobs still queued once `closed` is set are dropped without
/// invoking their callbacks.
#[expect(
    clippy::needless_pass_by_value,
    reason = "Values moved into thread, need ownership"
)]
pub fn render_worker(
    backend: Arc<dyn RenderBackend>,
    source: DocumentSource,
    requests: Receiver<RenderRequest>,
    opened: Sender<Result<usize, WorkerFault>>,
    closed: Arc<AtomicBool>,
) {
    let doc = match backend.open(&source) {
        Ok(d) => d,
        Err(e) => {
            let _ = opened.send(Err(e));
            return;
        }
    };
    let page_count = doc.page_count();
    if opened.send(Ok(page_count)).is_err() {
        return;
    }

    for request in requests.iter() {
        if closed.load(Ordering::Acquire) {
            break;
        }
        match request {
            RenderRequest::Page { page, spec, reply } => {
                reply(render_artifact(doc.as_ref(), page, &spec));
            }

            RenderRequest::PageSize { page, reply } => {
                let size = match doc.page_size(page) {
                    Ok(size) => Some(size),
                    Err(e) => {
                        debug!("No size for page {page}: {e}");
                        None
                    }
                };
                reply(size);
            }

            RenderRequest::Shutdown => break,
        }
    }

    // Dropping queued callbacks releases anyone blocked on them
    let dropped = requests.drain().count();
    debug!("Render worker for {source:?} stopped, {dropped} queued requests dropped");
}

/// Render one page into an artifact. Failures are logged and read as absent.
fn render_artifact(doc: &dyn DocumentHandle, page: usize, spec: &RenderSpec) -> Option<Artifact> {
    if page >= doc.page_count() {
        debug!(
            "Ignoring render of page {page}, document has {} pages",
            doc.page_count()
        );
        return None;
    }

    let rendered = doc
        .page_size(page)
        .and_then(|size| Ok(Artifact::new(doc.render_page(page, spec)?, size)));

    match rendered {
        Ok(artifact) => Some(artifact),
        Err(e) => {
            warn!("Failed to render page {page}: {e}");
            None
        }
    }
}
