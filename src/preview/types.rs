//! Core types for page preview rendering

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::POINTS_PER_INCH;

/// Where a render session reads its document from
#[derive(Clone)]
pub enum DocumentSource {
    /// A persisted file on disk
    File(PathBuf),
    /// An in-memory rendering, e.g. a live-edit submission
    Bytes(Arc<[u8]>),
}

impl DocumentSource {
    #[must_use]
    pub fn bytes(data: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes(data.into())
    }

    /// Short human readable description for log lines
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Bytes(data) => format!("<{} bytes in memory>", data.len()),
        }
    }
}

impl std::fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Resolution a page is rasterized at
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Multiplier over the page size in points
    Scale(f32),
    /// Dots per inch
    Dpi(f32),
}

impl Resolution {
    /// Magnification relative to 72 points per inch
    #[must_use]
    pub fn scale_factor(self) -> f32 {
        match self {
            Self::Scale(scale) => scale,
            Self::Dpi(dpi) => dpi / POINTS_PER_INCH,
        }
    }
}

/// Parameters for rendering a page
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderSpec {
    pub resolution: Resolution,
}

impl RenderSpec {
    #[must_use]
    pub const fn scale(scale: f32) -> Self {
        Self {
            resolution: Resolution::Scale(scale),
        }
    }

    #[must_use]
    pub const fn dpi(dpi: f32) -> Self {
        Self {
            resolution: Resolution::Dpi(dpi),
        }
    }
}

/// Display size of a page in points, with rotation already applied
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Normalize a raw page box for its /Rotate value.
    ///
    /// Quarter turns swap width and height; anything else keeps the box as is.
    #[must_use]
    pub fn from_rotated(width: f32, height: f32, rotation_deg: i32) -> Self {
        match rotation_deg.rem_euclid(360) {
            90 | 270 => Self::new(height, width),
            _ => Self::new(width, height),
        }
    }
}

/// Rendered bytes for one page plus its display size.
///
/// Cloning is cheap: the encoded image is shared.
#[derive(Clone)]
pub struct Artifact {
    pub bytes: Arc<[u8]>,
    pub size: PageSize,
}

impl Artifact {
    #[must_use]
    pub fn new(bytes: impl Into<Arc<[u8]>>, size: PageSize) -> Self {
        Self {
            bytes: bytes.into(),
            size,
        }
    }

    /// Byte-for-byte comparison of the rendered content
    #[must_use]
    pub fn same_content(&self, other: &Artifact) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes) || self.bytes[..] == other.bytes[..]
    }
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("len", &self.bytes.len())
            .field("width", &self.size.width)
            .field("height", &self.size.height)
            .finish()
    }
}

/// One page of a freshly rendered submission
#[derive(Clone, Debug)]
pub struct RenderedPage {
    pub size: PageSize,
    /// `None` where the render failed
    pub artifact: Option<Artifact>,
}

impl RenderedPage {
    #[must_use]
    pub fn rendered(artifact: Artifact) -> Self {
        Self {
            size: artifact.size,
            artifact: Some(artifact),
        }
    }

    /// A page that exists with `size` but could not be rendered
    #[must_use]
    pub fn failed(size: PageSize) -> Self {
        Self {
            size,
            artifact: None,
        }
    }
}

/// Change notification pushed to the viewer after a diff pass
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageUpdate {
    pub page_index: usize,
    pub version: i64,
    pub total_pages: usize,
    pub width: f32,
    pub height: f32,
}

impl PageUpdate {
    /// The "page count changed but no page body did" signal
    #[must_use]
    pub fn is_structure_only(&self) -> bool {
        self.page_index == 0 && self.width == 0.0 && self.height == 0.0
    }
}
