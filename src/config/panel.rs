//! Panel settings loaded from the user config directory

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::constants::{logging, naming, rig};
use crate::tree::validate_group_name;

/// User-tunable panel settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Node types matched by type (not name) when reconciling
    #[serde(default = "default_anchor_types")]
    pub anchor_types: Vec<String>,
    #[serde(default = "default_group_name")]
    pub default_group_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_anchor_types() -> Vec<String> {
    rig::DEFAULT_ANCHOR_TYPES.iter().map(|t| t.to_string()).collect()
}

fn default_group_name() -> String {
    naming::DEFAULT_GROUP_NAME.to_string()
}

fn default_log_level() -> String {
    logging::DEFAULT_LEVEL.to_string()
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            anchor_types: default_anchor_types(),
            default_group_name: default_group_name(),
            log_level: default_log_level(),
        }
    }
}

impl PanelConfig {
    pub fn path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(crate::constants::config::APP_DIR);
        path.push(crate::constants::config::FILENAME);
        path
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        let config_path = Self::path();
        if !config_path.exists() {
            info!(path = %config_path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let mut config: PanelConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse JSON from {:?}", path))?;
        config.validate_and_clamp();
        info!(path = %path.display(), anchors = config.anchor_types.len(), "Loaded config");
        Ok(config)
    }

    /// Write pretty JSON, creating the parent directory if needed
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config to JSON")?;
        fs::write(path, json).with_context(|| format!("Failed to write config to {:?}", path))?;
        info!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Replace invalid values with their defaults
    pub fn validate_and_clamp(&mut self) {
        self.anchor_types.retain(|anchor| !anchor.trim().is_empty());
        if self.anchor_types.is_empty() {
            warn!(using = ?rig::DEFAULT_ANCHOR_TYPES, "anchor_types is empty, using default");
            self.anchor_types = default_anchor_types();
        }

        if validate_group_name(&self.default_group_name).is_err() {
            warn!(default_group_name = %self.default_group_name, using = naming::DEFAULT_GROUP_NAME, "default_group_name is not a valid group name, using default");
            self.default_group_name = default_group_name();
        }

        let level = self.log_level.to_ascii_lowercase();
        if logging::LEVELS.contains(&level.as_str()) {
            self.log_level = level;
        } else {
            warn!(log_level = %self.log_level, using = logging::DEFAULT_LEVEL, "Unknown log_level, using default");
            self.log_level = default_log_level();
        }
    }
}
