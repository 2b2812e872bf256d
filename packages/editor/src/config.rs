use crate::events::DEFAULT_EVENT_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_NAME: &str = "folio.config.json";

/// Editor configuration file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorConfig {
    /// How long a transaction waits for the global lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default)]
    pub history: HistoryConfig,

    /// Check parent/child links of touched nodes before every commit
    #[serde(default = "default_true")]
    pub verify_integrity: bool,

    /// Buffered events per subscriber
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    /// Maximum undo levels (0 = unlimited)
    #[serde(default = "default_max_levels")]
    pub max_levels: usize,

    /// Adjacent typing within this window becomes one undo step (0 = never)
    #[serde(default = "default_group_window_ms")]
    pub group_window_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_max_levels() -> usize {
    100
}

fn default_group_window_ms() -> u64 {
    500
}

impl EditorConfig {
    /// Load config from a directory
    pub fn load(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config_path = dir.as_ref().join(DEFAULT_CONFIG_NAME);

        if !config_path.exists() {
            tracing::debug!(dir = %dir.as_ref().display(), "[EditorConfig] no config file, using defaults");
            return Ok(EditorConfig::default());
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: EditorConfig = serde_json::from_str(&content)?;
        tracing::debug!(path = %config_path.display(), "[EditorConfig] loaded");
        Ok(config)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl HistoryConfig {
    pub fn group_window(&self) -> Duration {
        Duration::from_millis(self.group_window_ms)
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            history: HistoryConfig::default(),
            verify_integrity: true,
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_levels: default_max_levels(),
            group_window_ms: default_group_window_ms(),
        }
    }
}
