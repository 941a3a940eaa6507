// =============================================================================
// CONFIGURATION - Load settings from vellum.toml
// =============================================================================
//
// This module handles loading and parsing configuration from vellum.toml.
// Provides defaults if the config file is missing or has errors.

use anyhow::{Context, Result};
use glam::UVec2;
use serde::Deserialize;
use std::path::Path;

use crate::backend::{ContextDesc, PixelFormat};
use crate::driver::Limits;

/// Root configuration structure
#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub context: ContextConfig,
    pub limits: LimitsConfig,
    pub debug: DebugConfig,
}

/// Context creation settings
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextConfig {
    pub width: u32,
    pub height: u32,
    /// Backbuffer format name, e.g. "rgba8" or "bgra8"
    pub backbuffer: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            backbuffer: "rgba8".to_string(),
        }
    }
}

/// Limits reported by the software driver
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_color_attachments: u32,
    pub max_texture_size: u32,
    pub max_work_group_count: [u32; 3],
    pub max_storage_bindings: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_color_attachments: limits.max_color_attachments,
            max_texture_size: limits.max_texture_size,
            max_work_group_count: limits.max_work_group_count,
            max_storage_bindings: limits.max_storage_bindings,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Default filter when RUST_LOG is unset
    pub log_level: String,
    pub compute_round_trip: bool,
    pub draw_smoke_test: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            compute_round_trip: true,
            draw_smoke_test: true,
        }
    }
}

impl Config {
    /// Load configuration from vellum.toml, falling back to defaults
    pub fn load() -> Self {
        Self::load_from_path("vellum.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load vellum.toml: {:#}. Using defaults.", e);
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

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Backbuffer format, falling back to RGBA8 for unknown names
    pub fn backbuffer_format(&self) -> PixelFormat {
        PixelFormat::from_name(&self.context.backbuffer).unwrap_or_else(|| {
            log::warn!(
                "Unknown backbuffer format '{}', defaulting to rgba8",
                self.context.backbuffer
            );
            PixelFormat::R8G8B8A8Unorm
        })
    }

    pub fn context_desc(&self) -> ContextDesc {
        ContextDesc {
            size: UVec2::new(self.context.width, self.context.height),
            backbuffer: self.backbuffer_format(),
            window: None,
        }
    }

    /// Software driver limits with the configured overrides applied
    pub fn driver_limits(&self) -> Limits {
        Limits {
            max_color_attachments: self.limits.max_color_attachments,
            max_draw_buffers: self.limits.max_color_attachments,
            max_texture_size: self.limits.max_texture_size,
            max_work_group_count: self.limits.max_work_group_count,
            max_storage_bindings: self.limits.max_storage_bindings,
            ..Limits::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join("vellum.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.context_desc().size, UVec2::new(800, 600));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[context]\nwidth = 1024\nbackbuffer = \"bgra8\"\n\n[limits]\nmax_color_attachments = 4").unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.context.width, 1024);
        assert_eq!(config.context.height, 600);
        assert_eq!(config.backbuffer_format(), PixelFormat::B8G8R8A8Unorm);

        let limits = config.driver_limits();
        assert_eq!((limits.max_color_attachments, limits.max_draw_buffers), (4, 4));
        assert_eq!(limits.max_texture_units, Limits::default().max_texture_units);
        assert!(config.debug.compute_round_trip);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[context\nwidth = ").unwrap();
        let err = Config::load_from_path(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse"));
    }

    #[test]
    fn unknown_backbuffer_falls_back() {
        let config = Config::from_toml_str("[context]\nbackbuffer = \"rgb565\"").unwrap();
        assert_eq!(config.backbuffer_format(), PixelFormat::R8G8B8A8Unorm);
    }
}
