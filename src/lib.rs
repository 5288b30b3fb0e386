// Export modules for use in tests
pub mod preview;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use preview::{CacheConfig, CacheCoordinator, CoordinatorState, PageUpdate};
pub use settings::Settings;
