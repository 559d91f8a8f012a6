use crate::align::{AlignMode, AlignOptions, DEFAULT_SCALE, DEFAULT_SIZE};
use crate::template::LandmarkSubset;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub alignment: AlignmentConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentConfig {
    #[serde(default = "default_mode")]
    pub mode: AlignMode,

    // Falls back to the mode's own subset when omitted
    #[serde(default)]
    pub subset: Option<LandmarkSubset>,

    #[serde(default = "default_size")]
    pub size: u32,

    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_mode() -> AlignMode {
    AlignMode::Affine3
}

fn default_size() -> u32 {
    DEFAULT_SIZE
}

fn default_scale() -> f64 {
    DEFAULT_SCALE
}

impl AlignmentConfig {
    pub fn options(&self) -> AlignOptions {
        AlignOptions {
            mode: self.mode,
            subset: self.subset.unwrap_or_else(|| self.mode.default_subset()),
            size: self.size,
            scale: self.scale,
        }
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            subset: None,
            size: default_size(),
            scale: default_scale(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    #[serde(default)]
    pub save_visualizations: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("~/.cache/facealign/debug")
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            save_visualizations: false,
            output_dir: default_output_dir(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain:
    /// 1. /etc/facealign/facealign.toml (system-wide)
    /// 2. ~/.config/facealign/facealign.toml (user)
    /// 3. Compiled defaults
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(config) = Self::load_from_path("/etc/facealign/facealign.toml") {
            config.validate()?;
            return Ok(config);
        }

        if let Some(home) = std::env::var_os("HOME") {
            let user_config = PathBuf::from(home)
                .join(".config")
                .join("facealign")
                .join("facealign.toml");
            if let Ok(config) = Self::load_from_path(&user_config) {
                config.validate()?;
                return Ok(config);
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.alignment
            .options()
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.debug.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Debug output directory cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
