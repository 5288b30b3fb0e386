//! Page preview cache infrastructure

mod backend;
mod cache;
mod coordinator;
mod diff;
mod layers;
#[cfg(feature = "pdf")]
mod mupdf_backend;
mod request;
mod session;
mod throttle;
mod types;
mod worker;

pub use backend::{DocumentHandle, RenderBackend};
pub use cache::BaseCache;
pub use coordinator::{CacheConfig, CacheCoordinator, CoordinatorState};
pub use diff::{DiffEngine, DiffOutcome, VersionClock};
pub use layers::{FileLayer, LayerStore, Layers, Overlay};
#[cfg(feature = "pdf")]
pub use mupdf_backend::MupdfBackend;
pub use request::{RenderCallback, RenderRequest, SessionError, SizeCallback, WorkerFault};
pub use session::RenderSession;
pub use throttle::PreviewThrottle;
pub use types::*;

/// Points per inch in PDF user space
pub const POINTS_PER_INCH: f32 = 72.0;
/// Scale for page images served to the viewer
pub const PREVIEW_SCALE: f32 = 2.0;
/// Scale for thumbnails
pub const THUMBNAIL_SCALE: f32 = 1.0;
/// High-resolution alternative for page images
pub const PREVIEW_DPI: f32 = 300.0;
/// Pages kept per base cache before LRU eviction
pub const DEFAULT_BASE_CAPACITY: usize = 512;
/// Quiet period before a burst of submissions is diffed
pub const DEFAULT_THROTTLE_DELAY_MS: u64 = 150;
