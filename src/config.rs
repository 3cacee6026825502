use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::DownloadMode;

/// How long each kind of notification stays on screen, in milliseconds.
/// Completion notifications have no entry: they stay until dismissed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub started_ms: u64,
    pub failed_ms: u64,
    pub cancelled_ms: u64,
    pub batch_summary_ms: u64,
    pub action_error_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            started_ms: 2000,
            failed_ms: 6000,
            cancelled_ms: 3000,
            batch_summary_ms: 5000,
            action_error_ms: 5000,
        }
    }
}

impl NotificationConfig {
    pub fn started(&self) -> Duration {
        Duration::from_millis(self.started_ms)
    }

    pub fn failed(&self) -> Duration {
        Duration::from_millis(self.failed_ms)
    }

    pub fn cancelled(&self) -> Duration {
        Duration::from_millis(self.cancelled_ms)
    }

    pub fn batch_summary(&self) -> Duration {
        Duration::from_millis(self.batch_summary_ms)
    }

    pub fn action_error(&self) -> Duration {
        Duration::from_millis(self.action_error_ms)
    }
}

/// Global configuration loaded from `~/.config/vdl/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdlConfig {
    /// Base URL of the download engine.
    pub server_url: String,
    /// Pause between playlist items.
    pub batch_item_delay_ms: u64,
    #[serde(default)]
    pub default_mode: DownloadMode,
    pub default_format: String,
    /// Optional history file location; defaults to the XDG state dir.
    #[serde(default)]
    pub history_path: Option<PathBuf>,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Default for VdlConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            batch_item_delay_ms: 1000,
            default_mode: DownloadMode::Video,
            default_format: "best".to_string(),
            history_path: None,
            notifications: NotificationConfig::default(),
        }
    }
}

impl VdlConfig {
    pub fn batch_item_delay(&self) -> Duration {
        Duration::from_millis(self.batch_item_delay_ms)
    }

    pub fn history_path(&self) -> Result<PathBuf> {
        match &self.history_path {
            Some(path) => Ok(path.clone()),
            None => {
                let xdg_dirs = xdg::BaseDirectories::with_prefix("vdl")?;
                Ok(xdg_dirs.place_state_file("history.json")?)
            }
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("vdl")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<VdlConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = VdlConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: VdlConfig = toml::from_str(&data)?;
    Ok(cfg)
}
