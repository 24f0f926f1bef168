// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section falls back to defaults, so a partial config.toml is fine.
// A missing or broken file logs a warning and runs with the defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub scene: SceneConfig,
    pub deferred: DeferredConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
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
            title: "Vulkan Samples".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Which render path draws the scene
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RenderPath {
    Forward,
    Deferred,
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    pub renderer: RenderPath,
    pub generate_mipmaps: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.02, 0.02, 0.03, 1.0],
            max_frames_in_flight: 2,
            renderer: RenderPath::Forward,
            generate_mipmaps: true,
        }
    }
}

/// Scene settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub model: PathBuf,
    pub auto_rotate: bool,
    /// Radians per second
    pub rotation_speed: f32,
    /// Vertical field of view in degrees
    pub fov: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("assets/models/DamagedHelmet.glb"),
            auto_rotate: true,
            rotation_speed: 0.4,
            fov: 60.0,
        }
    }
}

/// Deferred PBR settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeferredConfig {
    pub light_count: u32,
    /// 0 composite, 1 position, 2 normal, 3 albedo, 4 metallic/roughness/ao
    pub debug_view: u32,
    pub exposure: f32,
    pub gamma: f32,
}

impl Default for DeferredConfig {
    fn default() -> Self {
        Self {
            light_count: 6,
            debug_view: 0,
            exposure: 4.5,
            gamma: 2.2,
        }
    }
}

/// Shader location and reload behaviour
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub directory: PathBuf,
    pub hot_reload: bool,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("shaders"),
            hot_reload: false,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
            show_fps: true,
        }
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

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Parse configuration text and clamp out-of-range values
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;

        let frames = config.graphics.max_frames_in_flight.clamp(1, 4);
        if frames != config.graphics.max_frames_in_flight {
            log::warn!(
                "max_frames_in_flight {} out of range, using {}",
                config.graphics.max_frames_in_flight,
                frames
            );
            config.graphics.max_frames_in_flight = frames;
        }

        config.deferred.light_count = config
            .deferred
            .light_count
            .min(crate::renderer::deferred::MAX_LIGHTS as u32);

        Ok(config)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Path of a compiled shader inside the shader directory
    pub fn shader_path(&self, name: &str) -> PathBuf {
        self.shaders.directory.join(format!("{}.spv", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.renderer, RenderPath::Forward);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.deferred.light_count, 6);
        assert_eq!(config.shaders.directory, PathBuf::from("shaders"));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::parse(
            r#"
            [graphics]
            renderer = "deferred"

            [scene]
            model = "models/Sponza.gltf"
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.renderer, RenderPath::Deferred);
        assert_eq!(config.graphics.present_mode, "fifo");
        assert_eq!(config.scene.model, PathBuf::from("models/Sponza.gltf"));
        assert!(config.scene.auto_rotate);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let config = Config::parse(
            r#"
            [graphics]
            max_frames_in_flight = 0

            [deferred]
            light_count = 64
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.max_frames_in_flight, 1);
        assert_eq!(config.deferred.light_count, 6);
    }

    #[test]
    fn unknown_render_path_is_rejected() {
        assert!(Config::parse("[graphics]\nrenderer = \"raytraced\"\n").is_err());
    }

    #[test]
    fn present_mode_names_map_to_vulkan() {
        let mut config = Config::default();
        config.graphics.present_mode = "Mailbox".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);

        config.graphics.present_mode = "vsync-please".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn shader_paths_append_spv() {
        let config = Config::default();
        assert_eq!(
            config.shader_path("model.vert"),
            PathBuf::from("shaders").join("model.vert.spv")
        );
    }
}
