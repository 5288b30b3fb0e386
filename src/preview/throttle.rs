//! Trailing throttle for live-edit submissions
//!
//! Editors resubmit on every keystroke. The throttle keeps only the newest
//! submission, waits for a quiet window after the first one in a burst, then
//! runs a single diff pass. Anything submitted while that pass runs is picked
//! up by one follow-up pass.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

use super::coordinator::CacheCoordinator;
use super::types::PageUpdate;

enum ThrottleMessage {
    Submit(Arc<[u8]>),
    /// Diff the pending submission right away, then stop
    Finish,
    Shutdown,
}

/// Coalesces rapid submissions into diff passes on a background thread
pub struct PreviewThrottle {
    tx: Sender<ThrottleMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PreviewThrottle {
    /// Start the throttle thread. Non-empty update lists go to `sink`.
    pub fn spawn<F>(
        coordinator: Arc<CacheCoordinator>,
        delay: Duration,
        sink: F,
    ) -> std::io::Result<Self>
    where
        F: FnMut(Vec<PageUpdate>) + Send + 'static,
    {
        let (tx, rx) = flume::unbounded();
        let handle = std::thread::Builder::new()
            .name("preview-throttle".to_string())
            .spawn(move || throttle_loop(&coordinator, delay, &rx, sink))?;

        Ok(Self {
            tx,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue the latest edited document bytes
    pub fn submit(&self, bytes: impl Into<Arc<[u8]>>) {
        let _ = self.tx.send(ThrottleMessage::Submit(bytes.into()));
    }

    /// Stop the throttle thread. Pending submissions are dropped.
    pub fn shutdown(&self) {
        self.stop(ThrottleMessage::Shutdown);
    }

    /// Run a pass for the pending submission without waiting out the quiet
    /// window, then stop the thread.
    pub fn finish(&self) {
        self.stop(ThrottleMessage::Finish);
    }

    fn stop(&self, message: ThrottleMessage) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        let _ = self.tx.send(message);

        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("Preview throttle thread panicked");
        }
    }
}

impl Drop for PreviewThrottle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn throttle_loop<F>(
    coordinator: &CacheCoordinator,
    delay: Duration,
    rx: &Receiver<ThrottleMessage>,
    mut sink: F,
) where
    F: FnMut(Vec<PageUpdate>),
{
    loop {
        let mut latest = match rx.recv() {
            Ok(ThrottleMessage::Submit(bytes)) => bytes,
            Ok(ThrottleMessage::Finish | ThrottleMessage::Shutdown) | Err(_) => return,
        };

        let deadline = Instant::now() + delay;
        let mut coalesced = 0usize;
        let mut finishing = false;
        loop {
            match rx.recv_deadline(deadline) {
                Ok(ThrottleMessage::Submit(bytes)) => {
                    latest = bytes;
                    coalesced += 1;
                }
                Ok(ThrottleMessage::Finish) => {
                    finishing = true;
                    break;
                }
                Ok(ThrottleMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => break,
            }
        }

        // Identical input still diffs, the layers may have changed since the last pass
        debug!("Running diff pass ({coalesced} submissions coalesced)");
        let updates = coordinator.diff_and_update(&latest);
        if !updates.is_empty() {
            sink(updates);
        }
        if finishing {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::{CacheConfig, CoordinatorState};
    use crate::test_utils::{FakeBackend, FakeDoc};

    const DELAY: Duration = Duration::from_millis(40);

    fn setup(backend: &FakeBackend) -> Arc<CacheCoordinator> {
        let coordinator = Arc::new(CacheCoordinator::new(
            backend.shared(),
            CacheConfig::default(),
        ));
        coordinator.open_session(FakeDoc::new().page("a").page("b").source());
        coordinator
    }

    #[test]
    fn burst_is_coalesced_into_one_pass() {
        let backend = FakeBackend::new();
        let coordinator = setup(&backend);
        let (tx, rx) = flume::unbounded();
        let throttle = PreviewThrottle::spawn(coordinator.clone(), DELAY, move |updates| {
            let _ = tx.send(updates);
        })
        .expect("spawn");

        for content in ["x1", "x2", "x3"] {
            throttle.submit(FakeDoc::new().page(content).page("b").to_bytes());
        }
        let updates = rx.recv_timeout(Duration::from_secs(5)).expect("one pass");

        assert!(updates.iter().any(|u| u.page_index == 0));
        assert_eq!(
            &coordinator.get_image_data(0).expect("overlay").bytes[..],
            &FakeDoc::expected_bytes("x3", crate::preview::PREVIEW_SCALE)[..]
        );
        throttle.shutdown();
        assert!(rx.try_recv().is_err());
        // one open for the file, one for the single diff pass
        assert_eq!(backend.opens(), 2);
    }

    #[test]
    fn resubmission_after_clear_preview_is_published_again() {
        let backend = FakeBackend::new();
        let coordinator = setup(&backend);
        let (tx, rx) = flume::unbounded();
        let throttle = PreviewThrottle::spawn(coordinator.clone(), DELAY, move |updates| {
            let _ = tx.send(updates);
        })
        .expect("spawn");
        let edited = FakeDoc::new().page("z").to_bytes();

        throttle.submit(edited.clone());
        rx.recv_timeout(Duration::from_secs(5)).expect("first pass");
        coordinator.clear_preview();
        assert_eq!(coordinator.state(), CoordinatorState::FileOnly);

        throttle.submit(edited);
        let updates = rx.recv_timeout(Duration::from_secs(5)).expect("second pass");

        assert!(updates.iter().any(|u| u.page_index == 0 && u.total_pages == 1));
        assert_eq!(coordinator.state(), CoordinatorState::FileWithPreview);
        throttle.shutdown();
    }

    #[test]
    fn identical_resubmission_reports_nothing() {
        let backend = FakeBackend::new();
        let coordinator = setup(&backend);
        let (tx, rx) = flume::unbounded();
        let throttle = PreviewThrottle::spawn(coordinator, DELAY, move |updates| {
            let _ = tx.send(updates);
        })
        .expect("spawn");
        let edited = FakeDoc::new().page("z").to_bytes();

        throttle.submit(edited.clone());
        rx.recv_timeout(Duration::from_secs(5)).expect("first pass");
        throttle.submit(edited);
        std::thread::sleep(DELAY * 4);
        throttle.shutdown();

        // the second pass ran but had nothing to report
        assert_eq!(backend.opens(), 3);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn finish_runs_the_pending_submission() {
        let backend = FakeBackend::new();
        let coordinator = setup(&backend);
        let (tx, rx) = flume::unbounded();
        let throttle =
            PreviewThrottle::spawn(coordinator.clone(), Duration::from_secs(60), move |updates| {
                let _ = tx.send(updates);
            })
            .expect("spawn");

        throttle.submit(FakeDoc::new().page("last").page("b").to_bytes());
        throttle.finish();

        let updates = rx.try_recv().expect("pass ran before finish returned");
        assert_eq!(updates[0].page_index, 0);
        assert_eq!(
            &coordinator.get_image_data(0).expect("overlay").bytes[..],
            &FakeDoc::expected_bytes("last", crate::preview::PREVIEW_SCALE)[..]
        );
        throttle.finish();
    }

    #[test]
    fn shutdown_is_idempotent() {
        let backend = FakeBackend::new();
        let throttle =
            PreviewThrottle::spawn(setup(&backend), DELAY, |_| {}).expect("spawn");

        throttle.shutdown();
        throttle.shutdown();
        throttle.submit(vec![1u8, 2, 3]);
    }
}
