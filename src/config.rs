// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Missing or malformed files fall back to defaults. The graphics and debug
// sections convert into the backend-agnostic RenderSettings.

use crate::context::{PresentModePreference, RenderSettings};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub assets: AssetsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Render Core".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// auto, vulkan, wgpu, gl or software
    pub backend: String,
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    pub max_draws_per_frame: u32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: "auto".to_string(),
            present_mode: "auto".to_string(),
            clear_color: [0.1, 0.2, 0.8, 1.0],
            frames_in_flight: 3,
            max_draws_per_frame: 4096,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
    pub hot_reload_shaders: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_to_file: false,
            log_file: "render_core.log".to_string(),
            show_fps: true,
            hot_reload_shaders: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Directory holding shaders/, models/, textures/ and fonts/
    pub root: PathBuf,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self { root: PathBuf::from(".") }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn present_mode(&self) -> PresentModePreference {
        PresentModePreference::parse(&self.graphics.present_mode).unwrap_or_else(|| {
            log::warn!(
                "Unknown present mode '{}', selecting automatically",
                self.graphics.present_mode
            );
            PresentModePreference::Auto
        })
    }

    pub fn to_settings(&self) -> RenderSettings {
        RenderSettings {
            app_name: self.window.title.clone(),
            backend: self.graphics.backend.clone(),
            frames_in_flight: self.graphics.frames_in_flight.max(2),
            present_mode: self.present_mode(),
            clear_colour: self.graphics.clear_color,
            validation: self.debug.validation_layers,
            max_draws_per_frame: self.graphics.max_draws_per_frame.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.graphics.backend, "auto");
        assert_eq!(config.graphics.frames_in_flight, 3);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[graphics]\nbackend = \"software\"\nframes_in_flight = 1\npresent_mode = \"vsync\"\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.window.width, 1280);

        let settings = config.to_settings();
        assert_eq!(settings.backend, "software");
        assert_eq!(settings.frames_in_flight, 2);
        assert_eq!(settings.present_mode, PresentModePreference::Fifo);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[graphics\nbackend = ").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn unknown_present_mode_is_auto() {
        let mut config = Config::default();
        config.graphics.present_mode = "turbo".to_string();
        assert_eq!(config.present_mode(), PresentModePreference::Auto);
    }
}
