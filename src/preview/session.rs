//! One opened document bound to its own serialized render worker

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use flume::Sender;
use log::{debug, warn};

use super::backend::RenderBackend;
use super::request::{RenderRequest, SessionError};
use super::types::{Artifact, DocumentSource, PageSize, RenderSpec};
use super::worker::render_worker;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// An opened document and the single worker thread allowed to touch it.
///
/// Independent sessions run on independent threads, so a transient diff
/// session never contends with the file session.
pub struct RenderSession {
    id: u64,
    page_count: usize,
    // Taken on close. Sends happen under this lock, so none can land after
    // the worker has drained its queue and the last sender is gone.
    request_tx: Mutex<Option<Sender<RenderRequest>>>,
    closed: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RenderSession {
    /// Open `source` on a fresh worker thread and wait for it to report back.
    pub fn open(
        backend: Arc<dyn RenderBackend>,
        source: DocumentSource,
    ) -> Result<Self, SessionError> {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let closed = Arc::new(AtomicBool::new(false));

        let (request_tx, request_rx) = flume::unbounded();
        let (opened_tx, opened_rx) = flume::bounded(1);

        let worker_closed = closed.clone();
        let handle = std::thread::Builder::new()
            .name(format!("render-session-{id}"))
            .spawn(move || {
                render_worker(backend, source, request_rx, opened_tx, worker_closed);
            })?;

        match opened_rx.recv() {
            Ok(Ok(page_count)) => {
                debug!("Render session {id} opened with {page_count} pages");
                Ok(Self {
                    id,
                    page_count,
                    request_tx: Mutex::new(Some(request_tx)),
                    closed,
                    worker: Mutex::new(Some(handle)),
                })
            }
            Ok(Err(fault)) => {
                let _ = handle.join();
                Err(SessionError::Open(fault))
            }
            Err(_) => {
                let _ = handle.join();
                Err(SessionError::WorkerGone)
            }
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue a render; `callback` runs on the worker thread.
    ///
    /// An out-of-range page completes with `None`. On a closed session the
    /// job is dropped and `callback` never runs.
    pub fn render_async<F>(&self, page: usize, spec: RenderSpec, callback: F)
    where
        F: FnOnce(Option<Artifact>) + Send + 'static,
    {
        self.send(RenderRequest::Page {
            page,
            spec,
            reply: Box::new(callback),
        });
    }

    /// Render and wait for the result
    #[must_use]
    pub fn render_blocking(&self, page: usize, spec: RenderSpec) -> Option<Artifact> {
        let (tx, rx) = flume::bounded(1);
        self.render_async(page, spec, move |artifact| {
            let _ = tx.send(artifact);
        });
        rx.recv().ok().flatten()
    }

    /// Display size of `page`, or `None` when it is out of range, unreadable,
    /// or the session is closed.
    #[must_use]
    pub fn page_size_blocking(&self, page: usize) -> Option<PageSize> {
        let (tx, rx) = flume::bounded(1);
        self.send(RenderRequest::PageSize {
            page,
            reply: Box::new(move |size| {
                let _ = tx.send(size);
            }),
        });
        rx.recv().ok().flatten()
    }

    // Dropping a request drops its reply, which releases anyone waiting on it
    fn send(&self, request: RenderRequest) {
        let request_tx = self
            .request_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match request_tx.as_ref() {
            Some(tx) if !self.is_closed() => {
                let _ = tx.send(request);
            }
            _ => debug!("Session {} closed, dropping {request:?}", self.id),
        }
    }

    /// Stop the worker and release the document. Safe to call repeatedly.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let request_tx = self
            .request_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = request_tx {
            let _ = tx.send(RenderRequest::Shutdown);
        }

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        // The last owner can be a callback running on the worker itself.
        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("Render worker for session {} panicked", self.id);
        }
        debug!("Render session {} closed", self.id);
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        self.close();
    }
}
