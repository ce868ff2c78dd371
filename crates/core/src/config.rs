//! Engine configuration loaded from a TOML file.
//!
//! Every section is optional; missing keys fall back to their defaults.
//!
//! ```toml
//! [frames]
//! frames_in_flight = 2
//! preferred_image_count = 3
//! present_mode = "mailbox"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub frames: FramesConfig,
    pub render: RenderConfig,
    pub debug: DebugConfig,
}

/// Window settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "framechain".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Preferred presentation mode. Falls back to FIFO when unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePreference {
    Fifo,
    FifoRelaxed,
    #[default]
    Mailbox,
    Immediate,
}

/// Frame pipelining settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramesConfig {
    /// Number of frame slots (F).
    pub frames_in_flight: usize,
    /// Image count requested from the presentation surface.
    pub preferred_image_count: u32,
    /// Smallest image count the pool accepts.
    pub min_image_count: u32,
    pub present_mode: PresentModePreference,
    /// Bound on admission and hazard waits. Absent means wait forever.
    pub slot_wait_timeout_ms: Option<u64>,
    /// Poll interval while draining before a rebuild.
    pub drain_poll_ms: u64,
    /// Polls per slot before the drain declares the device lost.
    pub drain_max_polls: u32,
    /// Rebuild the surface when present reports it suboptimal.
    pub rebuild_on_suboptimal: bool,
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            preferred_image_count: 3,
            min_image_count: 2,
            present_mode: PresentModePreference::default(),
            slot_wait_timeout_ms: None,
            drain_poll_ms: 100,
            drain_max_polls: 50,
            rebuild_on_suboptimal: true,
        }
    }
}

impl FramesConfig {
    pub fn slot_wait_timeout(&self) -> Option<Duration> {
        self.slot_wait_timeout_ms.map(Duration::from_millis)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }

    /// Checks the relationships between the fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a count is zero or the minimum image
    /// count exceeds the preferred one.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::Config("frames_in_flight must be at least 1".into()));
        }
        if self.min_image_count == 0 {
            return Err(Error::Config("min_image_count must be at least 1".into()));
        }
        if self.preferred_image_count < self.min_image_count {
            return Err(Error::Config(format!(
                "preferred_image_count ({}) is below min_image_count ({})",
                self.preferred_image_count, self.min_image_count
            )));
        }
        if self.drain_max_polls == 0 {
            return Err(Error::Config("drain_max_polls must be at least 1".into()));
        }
        Ok(())
    }
}

/// Colours used by the demo passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub clear_color: [f32; 4],
    pub overlay_color: [f32; 4],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.02, 0.02, 0.05, 1.0],
            overlay_color: [0.9, 0.6, 0.1, 1.0],
        }
    }
}

/// Debug settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation: bool,
    pub log_filter: String,
    pub stats_interval_secs: u64,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            log_filter: "info,framechain_frame=debug".to_string(),
            stats_interval_secs: 2,
        }
    }
}

impl DebugConfig {
    /// Period of the frame rate log; never shorter than one second.
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }
}

impl Config {
    /// Load configuration from a specific path, falling back to defaults if it
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed, or
    /// fails validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;

        info!("Loaded configuration from {:?}", path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.frames.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.frames.frames_in_flight, 2);
        assert_eq!(config.frames.preferred_image_count, 3);
        assert_eq!(config.frames.slot_wait_timeout(), None);
        assert!(config.frames.validate().is_ok());
    }

    #[test]
    fn test_partial_document() {
        let config = Config::from_toml(
            r#"
            [frames]
            frames_in_flight = 3
            present_mode = "fifo_relaxed"
            slot_wait_timeout_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.frames.frames_in_flight, 3);
        assert_eq!(config.frames.present_mode, PresentModePreference::FifoRelaxed);
        assert_eq!(
            config.frames.slot_wait_timeout(),
            Some(Duration::from_millis(500))
        );
        assert_eq!(config.window, WindowConfig::default());
    }

    #[test]
    fn test_rejects_zero_slots() {
        let err = Config::from_toml("[frames]\nframes_in_flight = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_inverted_image_counts() {
        let err = Config::from_toml("[frames]\nmin_image_count = 4\npreferred_image_count = 2\n")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(matches!(
            Config::from_toml("[frames\n"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_stats_interval_has_a_floor() {
        let config = Config::from_toml("[debug]\nstats_interval_secs = 0\n").unwrap();
        assert_eq!(config.debug.stats_interval(), Duration::from_secs(1));
        assert_eq!(DebugConfig::default().stats_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_from_path("/nonexistent/framechain.toml").unwrap();
        assert_eq!(config, Config::default());
    }
}
