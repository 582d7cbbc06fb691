//! Player configuration
//!
//! Stored as XML (`player.xml` in the user config directory). Every field
//! has a default, so partial files and a missing file both work. Command-line
//! flags are applied on top by the binary.

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::video::{BackpressurePolicy, DEFAULT_BUFFER_COUNT, MIN_BUFFER_COUNT};

/// Where buffers live and how they are shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// GPU buffers through wgpu
    #[default]
    Wgpu,
    /// CPU memory and a headless surface
    Memory,
}

impl Backend {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "wgpu" | "gpu" => Some(Backend::Wgpu),
            "memory" | "headless" => Some(Backend::Memory),
            _ => None,
        }
    }
}

/// Settings of one player run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "HdrVideoPlayer")]
pub struct PlayerConfig {
    /// Start fullscreen
    #[serde(rename = "fullscreen", default)]
    pub fullscreen: bool,

    /// Show the subtitle overlay stream
    #[serde(rename = "overlay", default)]
    pub overlay: bool,

    /// Buffers per presented stream (at least 2)
    #[serde(rename = "bufferCount", default = "default_buffer_count")]
    pub buffer_count: usize,

    /// What to do with a decoded frame when every buffer is busy
    #[serde(rename = "backpressure", default)]
    pub backpressure: BackpressurePolicy,

    /// Overlay fill colour, ARGB
    #[serde(rename = "overlayColor", default = "default_overlay_color")]
    pub overlay_color: u32,

    #[serde(rename = "backend", default)]
    pub backend: Backend,

    /// Window size used to place the overlay
    #[serde(rename = "windowWidth", default = "default_window_width")]
    pub window_width: u32,

    #[serde(rename = "windowHeight", default = "default_window_height")]
    pub window_height: u32,

    /// Log filter used when no log environment variable is set
    #[serde(rename = "logLevel", default = "default_log_level")]
    pub log_level: String,

    /// Also write logs to this file
    #[serde(rename = "logFile", default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

fn default_buffer_count() -> usize {
    DEFAULT_BUFFER_COUNT
}

fn default_overlay_color() -> u32 {
    0xFFFF_FFFF
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            fullscreen: false,
            overlay: false,
            buffer_count: default_buffer_count(),
            backpressure: BackpressurePolicy::default(),
            overlay_color: default_overlay_color(),
            backend: Backend::default(),
            window_width: default_window_width(),
            window_height: default_window_height(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

impl PlayerConfig {
    /// Default location: `<config dir>/hdr-video-player/player.xml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("hdr-video-player");
            p.push("player.xml");
            p
        })
    }

    /// Clamp values to what the pipeline accepts
    pub fn sanitize(&mut self) {
        self.buffer_count = self.buffer_count.max(MIN_BUFFER_COUNT);
        self.window_width = self.window_width.max(1);
        self.window_height = self.window_height.max(1);
    }

    /// Load from an XML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let mut config: Self = from_str(&contents)?;
        config.sanitize();
        Ok(config)
    }

    /// Load from `path`, else the default location if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::debug!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Save as XML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let xml = to_string(self)?;
        let formatted = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml);
        fs::write(path, formatted)?;
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error: {0}")]
    XmlParse(#[from] quick_xml::DeError),

    #[error("XML write error: {0}")]
    XmlWrite(#[from] quick_xml::SeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlayerConfig::default();
        assert_eq!(config.buffer_count, 3);
        assert_eq!(config.backpressure, BackpressurePolicy::HoldPending);
        assert_eq!(config.backend, Backend::Wgpu);
        assert!(!config.overlay);
        assert!(!config.fullscreen);
    }

    #[test]
    fn test_partial_xml_uses_defaults() {
        let xml = r#"<HdrVideoPlayer>
            <overlay>true</overlay>
            <backpressure>drop_frame</backpressure>
            <backend>memory</backend>
            <logFile>/var/log/hdr-video-player.log</logFile>
        </HdrVideoPlayer>"#;
        let config: PlayerConfig = from_str(xml).unwrap();
        assert_eq!(config.log_file, Some(PathBuf::from("/var/log/hdr-video-player.log")));
        assert!(config.overlay);
        assert_eq!(config.backpressure, BackpressurePolicy::DropFrame);
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.buffer_count, 3);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_sanitize_buffer_count() {
        let mut config = PlayerConfig {
            buffer_count: 1,
            ..Default::default()
        };
        config.sanitize();
        assert_eq!(config.buffer_count, MIN_BUFFER_COUNT);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("hdr-video-player-test-{}", std::process::id()));
        let path = dir.join("player.xml");
        let config = PlayerConfig {
            overlay: true,
            buffer_count: 4,
            overlay_color: 0x80FF_0000,
            ..Default::default()
        };

        config.save(&path).unwrap();
        let loaded = PlayerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_missing_file() {
        let err = PlayerConfig::load(Path::new("/nonexistent/player.xml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(Backend::parse("WGPU"), Some(Backend::Wgpu));
        assert_eq!(Backend::parse("memory"), Some(Backend::Memory));
        assert_eq!(Backend::parse("vulkan"), None);
    }
}
