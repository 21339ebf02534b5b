//! CLI configuration file handling.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use drivelink_storage::onedrive::{AuthConfig, DriveConfig};

/// Environment variable overriding the configured client ID.
pub const CLIENT_ID_ENV: &str = "DRIVELINK_CLIENT_ID";

/// Everything the CLI needs to sign in and reach the drive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub auth: AuthConfig,
    pub drive: DriveConfig,
}

impl CliConfig {
    /// `<config dir>/drivelink/config.json`, when the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("drivelink").join("config.json"))
    }

    /// Load configuration from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Replace the client ID when `client_id` is set and non-blank.
    pub fn with_client_id(mut self, client_id: Option<String>) -> Self {
        if let Some(id) = client_id.filter(|id| !id.trim().is_empty()) {
            self.auth.client_id = id.trim().to_string();
        }
        self
    }
}
