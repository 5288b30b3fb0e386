//! Deterministic in-process backend for exercising the cache without MuPDF
//!
//! A fake document is plain text: a `%FAKEDOC` header line followed by one
//! line per page, `<width> <height> <rotation> <ok|fail> <content>`. Rendering
//! a page yields `<content>@<scale>` as its bytes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::preview::{
    DocumentHandle, DocumentSource, PageSize, RenderBackend, RenderSpec, WorkerFault,
};

const HEADER: &str = "%FAKEDOC";

#[derive(Clone, Debug)]
struct FakePage {
    content: String,
    width: f32,
    height: f32,
    rotation: i32,
    fails: bool,
}

/// Builder for fake document bytes
#[derive(Clone, Debug, Default)]
pub struct FakeDoc {
    pages: Vec<FakePage>,
}

impl FakeDoc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Letter-sized page rendering to `content`
    pub fn page(self, content: &str) -> Self {
        self.sized_page(content, 612.0, 792.0)
    }

    pub fn sized_page(self, content: &str, width: f32, height: f32) -> Self {
        self.push(content, width, height, 0, false)
    }

    pub fn rotated_page(self, content: &str, rotation: i32) -> Self {
        self.push(content, 612.0, 792.0, rotation, false)
    }

    /// Page whose render always fails
    pub fn failing_page(self, content: &str) -> Self {
        self.push(content, 612.0, 792.0, 0, true)
    }

    fn push(mut self, content: &str, width: f32, height: f32, rotation: i32, fails: bool) -> Self {
        assert!(
            !content.contains(char::is_whitespace),
            "fake page content must be a single token"
        );
        self.pages.push(FakePage {
            content: content.to_string(),
            width,
            height,
            rotation,
            fails,
        });
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::from(HEADER);
        out.push('\n');
        for page in &self.pages {
            let mode = if page.fails { "fail" } else { "ok" };
            out.push_str(&format!(
                "{} {} {} {} {}\n",
                page.width, page.height, page.rotation, mode, page.content
            ));
        }
        out.into_bytes()
    }

    pub fn source(&self) -> DocumentSource {
        DocumentSource::bytes(self.to_bytes())
    }

    /// Bytes a page renders to at `scale`
    pub fn expected_bytes(content: &str, scale: f32) -> Vec<u8> {
        format!("{content}@{scale}").into_bytes()
    }
}

#[derive(Debug, Default)]
struct FakeStats {
    opens: AtomicUsize,
    renders: AtomicUsize,
}

/// Backend interpreting [`FakeDoc`] bytes, counting every open and render
#[derive(Clone, Debug, Default)]
pub struct FakeBackend {
    stats: Arc<FakeStats>,
    render_delay: Option<Duration>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every page render
    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = Some(delay);
        self
    }

    pub fn shared(&self) -> Arc<dyn RenderBackend> {
        Arc::new(self.clone())
    }

    pub fn opens(&self) -> usize {
        self.stats.opens.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.stats.renders.load(Ordering::SeqCst)
    }
}

impl RenderBackend for FakeBackend {
    fn open(&self, source: &DocumentSource) -> Result<Box<dyn DocumentHandle>, WorkerFault> {
        let data = match source {
            DocumentSource::File(path) => std::fs::read(path)
                .map_err(|e| WorkerFault::generic(format!("{}: {e}", path.display())))?,
            DocumentSource::Bytes(data) => data.to_vec(),
        };
        let pages = parse(&data)?;
        self.stats.opens.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeHandle {
            pages,
            stats: self.stats.clone(),
            render_delay: self.render_delay,
        }))
    }
}

fn parse(data: &[u8]) -> Result<Vec<FakePage>, WorkerFault> {
    let text = std::str::from_utf8(data).map_err(|_| WorkerFault::generic("not utf-8"))?;
    let mut lines = text.lines();
    if lines.next() != Some(HEADER) {
        return Err(WorkerFault::generic("not a fake document"));
    }

    lines
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [width, height, rotation, mode, content] = fields[..] else {
                return Err(WorkerFault::generic(format!("bad page line: {line}")));
            };
            let bad = || WorkerFault::generic(format!("bad page line: {line}"));
            Ok(FakePage {
                content: content.to_string(),
                width: width.parse().map_err(|_| bad())?,
                height: height.parse().map_err(|_| bad())?,
                rotation: rotation.parse().map_err(|_| bad())?,
                fails: mode == "fail",
            })
        })
        .collect()
}

struct FakeHandle {
    pages: Vec<FakePage>,
    stats: Arc<FakeStats>,
    render_delay: Option<Duration>,
}

impl FakeHandle {
    fn page(&self, index: usize) -> Result<&FakePage, WorkerFault> {
        self.pages.get(index).ok_or(WorkerFault::PageOutOfRange {
            page: index,
            page_count: self.pages.len(),
        })
    }
}

impl DocumentHandle for FakeHandle {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_size(&self, index: usize) -> Result<PageSize, WorkerFault> {
        let page = self.page(index)?;
        Ok(PageSize::from_rotated(page.width, page.height, page.rotation))
    }

    fn render_page(&self, index: usize, spec: &RenderSpec) -> Result<Vec<u8>, WorkerFault> {
        let page = self.page(index)?;
        if let Some(delay) = self.render_delay {
            std::thread::sleep(delay);
        }
        self.stats.renders.fetch_add(1, Ordering::SeqCst);
        if page.fails {
            return Err(WorkerFault::generic(format!("page {index} is broken")));
        }
        Ok(FakeDoc::expected_bytes(
            &page.content,
            spec.resolution.scale_factor(),
        ))
    }
}
