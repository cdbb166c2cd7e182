use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::{TaskboardError, TaskboardResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Fan-out behaviour of the board session registry and connection handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Deliver broadcasts back to the connection whose action caused them.
    #[serde(default = "default_true")]
    pub echo_to_sender: bool,
    /// Send a `full_board_state` snapshot right after a member joins.
    #[serde(default = "default_true")]
    pub send_snapshot_on_join: bool,
    /// Per-connection outgoing queue depth. A subscriber whose queue is full is dropped.
    #[serde(default = "default_outgoing_buffer")]
    pub outgoing_buffer: usize,
    /// Reply with an `ack` event when an action carrying a `request_id` succeeds.
    #[serde(default = "default_true")]
    pub acknowledge_actions: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            echo_to_sender: true,
            send_snapshot_on_join: true,
            outgoing_buffer: default_outgoing_buffer(),
            acknowledge_actions: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret used to validate connection tokens.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Development-only token table, checked before the JWT secret.
    #[serde(default)]
    pub tokens: HashMap<String, Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Limit list creation, renaming and deletion to owners and admins.
    #[serde(default)]
    pub restrict_list_management: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How many minutes before the due date a reminder fires.
    #[serde(default)]
    pub lead_minutes: u32,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lead_minutes: 0,
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_outgoing_buffer() -> usize {
    256
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn config_path() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            dirs::home_dir().map(|home| home.join(".config/taskboard/config.toml"))
        }
        #[cfg(target_os = "linux")]
        {
            dirs::config_dir().map(|config| config.join("taskboard/config.toml"))
        }
        #[cfg(target_os = "windows")]
        {
            dirs::config_dir().map(|config| config.join("taskboard\\config.toml"))
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }

    /// Load the config from the platform default location, falling back to defaults
    /// when the file is missing or unreadable.
    pub fn load() -> Self {
        if let Some(config_path) = Self::config_path() {
            if config_path.exists() {
                match Self::load_from(&config_path) {
                    Ok(config) => return config,
                    Err(error) => {
                        tracing::warn!(
                            path = %config_path.display(),
                            %error,
                            "ignoring unreadable config file"
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Load the config from an explicit path. Unlike [`AppConfig::load`], failures are errors.
    pub fn load_from(path: &Path) -> TaskboardResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> TaskboardResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| TaskboardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> TaskboardResult<()> {
        if self.sync.outgoing_buffer == 0 {
            return Err(TaskboardError::Config(
                "sync.outgoing_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
