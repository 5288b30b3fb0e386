use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::preview::{
    CacheConfig, DEFAULT_BASE_CAPACITY, DEFAULT_THROTTLE_DELAY_MS, PREVIEW_SCALE, RenderSpec,
    THUMBNAIL_SCALE,
};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "pagecache";
const LOG_FILENAME: &str = "pagecache.log";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_preview_scale")]
    pub preview_scale: f32,

    /// Render page images at this DPI instead of `preview_scale`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_dpi: Option<f32>,

    #[serde(default = "default_thumbnail_scale")]
    pub thumbnail_scale: f32,

    #[serde(default = "default_base_cache_pages")]
    pub base_cache_pages: usize,

    #[serde(default = "default_throttle_delay_ms")]
    pub throttle_delay_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_preview_scale() -> f32 {
    PREVIEW_SCALE
}

fn default_thumbnail_scale() -> f32 {
    THUMBNAIL_SCALE
}

fn default_base_cache_pages() -> usize {
    DEFAULT_BASE_CAPACITY
}

fn default_throttle_delay_ms() -> u64 {
    DEFAULT_THROTTLE_DELAY_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from(LOG_FILENAME)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            preview_scale: default_preview_scale(),
            preview_dpi: None,
            thumbnail_scale: default_thumbnail_scale(),
            base_cache_pages: default_base_cache_pages(),
            throttle_delay_ms: default_throttle_delay_ms(),
            log_level: default_log_level(),
            log_file: default_log_file(),
        }
    }
}

impl Settings {
    /// `<config dir>/pagecache/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
    }

    /// Load from `path`, or the default location when `None`.
    ///
    /// A missing, unreadable or malformed file is logged and yields defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => {
                    warn!("Could not determine config directory, using default settings");
                    return Self::default();
                }
            },
        };

        if !path.exists() {
            info!("Settings file {path:?} not found, using defaults");
            return Self::default();
        }
        Self::load_from_path(&path).unwrap_or_default()
    }

    fn load_from_path(path: &Path) -> Option<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                error!("Failed to read settings file {path:?}: {e}");
                return None;
            }
        };
        match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");
                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                }
                settings.sanitize();
                Some(settings)
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
                None
            }
        }
    }

    /// Write the settings as YAML, creating the parent directory if needed
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_yaml::to_string(self).map_err(std::io::Error::other)?;
        fs::write(path, content)?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }

    pub fn preview_spec(&self) -> RenderSpec {
        match self.preview_dpi {
            Some(dpi) => RenderSpec::dpi(dpi),
            None => RenderSpec::scale(self.preview_scale),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            preview: self.preview_spec(),
            thumbnail: RenderSpec::scale(self.thumbnail_scale),
            base_capacity: self.base_cache_pages,
        }
    }

    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.throttle_delay_ms)
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or_else(|_| {
            warn!("Unknown log level {:?}, using info", self.log_level);
            log::LevelFilter::Info
        })
    }

    // Non-positive scales would render empty images
    fn sanitize(&mut self) {
        if !is_positive(self.preview_scale) {
            warn!("Invalid preview_scale {}, using default", self.preview_scale);
            self.preview_scale = default_preview_scale();
        }
        if !is_positive(self.thumbnail_scale) {
            warn!("Invalid thumbnail_scale {}, using default", self.thumbnail_scale);
            self.thumbnail_scale = default_thumbnail_scale();
        }
        if self.preview_dpi.is_some_and(|dpi| !is_positive(dpi)) {
            warn!("Invalid preview_dpi, falling back to preview_scale");
            self.preview_dpi = None;
        }
    }
}

fn is_positive(value: f32) -> bool {
    value.is_finite() && value > 0.0
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );
    settings.version = CURRENT_VERSION;
}
