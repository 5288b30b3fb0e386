//! Page-level diff of a freshly rendered submission against the base layer

use std::sync::atomic::{AtomicI64, Ordering};

use log::debug;

use super::cache::BaseCache;
use super::layers::Overlay;
use super::types::{Artifact, PageUpdate, RenderedPage};

/// Time-derived version numbers that never repeat or go backwards.
///
/// Wall-clock milliseconds, bumped by one whenever the clock has not advanced
/// since the last value handed out.
#[derive(Debug, Default)]
pub struct VersionClock {
    last: AtomicI64,
}

impl VersionClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Result of one diff pass
#[derive(Debug)]
pub struct DiffOutcome {
    pub overlay: Overlay,
    pub updates: Vec<PageUpdate>,
}

/// Decides which pages of a submission changed relative to the base layer
#[derive(Debug, Default)]
pub struct DiffEngine {
    clock: VersionClock,
}

impl DiffEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `new_pages` against `base` and the currently published
    /// `previous` overlay.
    ///
    /// A page goes into the new overlay when its base entry is missing, its
    /// render failed, or the bytes differ from base. It is reported to the
    /// viewer when it differs from what the viewer currently shows (the
    /// previous overlay entry, else base), so resubmitting the same document
    /// reports nothing and reverting a page to its base content is reported.
    /// Updates are in page order and carry the page's display size, failed
    /// renders included. When the document shrank and nothing was reported,
    /// a single `(0, v, new_total, 0, 0)` update signals the new page count.
    #[must_use]
    pub fn diff(
        &self,
        new_pages: &[RenderedPage],
        base: Option<&BaseCache>,
        previous: Option<&Overlay>,
        previous_total: usize,
    ) -> DiffOutcome {
        let new_total = new_pages.len();
        let mut overlay = Overlay::new(new_total);
        let mut updates = Vec::new();

        for (index, page) in new_pages.iter().enumerate() {
            let current = page.artifact.as_ref();
            let base_artifact = base.and_then(|b| b.peek(index));
            let differs_from_base = !matches(base_artifact.as_ref(), current);
            let differs_from_view = match previous {
                // beyond the previous overlay the viewer shows nothing
                Some(prev) if index >= prev.total_pages() => true,
                Some(prev) if prev.is_unrendered(index) => current.is_some(),
                Some(prev) => match prev.get(index) {
                    Some(shown) => !matches(Some(shown), current),
                    None => differs_from_base,
                },
                None => differs_from_base,
            };

            if differs_from_base {
                match current {
                    Some(artifact) => overlay.insert(index, artifact.clone()),
                    None => overlay.mark_unrendered(index),
                }
            }
            if differs_from_view {
                updates.push(PageUpdate {
                    page_index: index,
                    version: self.clock.next(),
                    total_pages: new_total,
                    width: page.size.width,
                    height: page.size.height,
                });
            }
        }

        if new_total < previous_total && updates.is_empty() {
            debug!("Page count shrank {previous_total} -> {new_total} without visual changes");
            updates.push(PageUpdate {
                page_index: 0,
                version: self.clock.next(),
                total_pages: new_total,
                width: 0.0,
                height: 0.0,
            });
        }

        DiffOutcome { overlay, updates }
    }
}

// Both sides present and byte-equal. A missing side never matches.
fn matches(old: Option<&Artifact>, new: Option<&Artifact>) -> bool {
    matches!((old, new), (Some(old), Some(new)) if old.same_content(new))
}
