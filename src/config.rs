//! Configuration module for Rookery

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How often the timeline controller polls for new posts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshInterval {
    /// Every second
    OneSecond,
    /// Every 5 seconds
    FiveSeconds,
    /// Every 15 seconds
    FifteenSeconds,
    /// Every 30 seconds
    #[default]
    ThirtySeconds,
    /// Every minute
    OneMinute,
    /// Every 5 minutes
    FiveMinutes,
    /// Manual refresh only
    Never,
}

impl RefreshInterval {
    /// Polling period, or `None` when polling is disabled
    pub const fn as_duration(self) -> Option<Duration> {
        match self {
            Self::OneSecond => Some(Duration::from_secs(1)),
            Self::FiveSeconds => Some(Duration::from_secs(5)),
            Self::FifteenSeconds => Some(Duration::from_secs(15)),
            Self::ThirtySeconds => Some(Duration::from_secs(30)),
            Self::OneMinute => Some(Duration::from_secs(60)),
            Self::FiveMinutes => Some(Duration::from_secs(300)),
            Self::Never => None,
        }
    }

    /// All selectable intervals, in menu order
    pub const fn all() -> &'static [Self] {
        &[
            Self::OneSecond,
            Self::FiveSeconds,
            Self::FifteenSeconds,
            Self::ThirtySeconds,
            Self::OneMinute,
            Self::FiveMinutes,
            Self::Never,
        ]
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Background timeline refresh interval
    #[serde(default)]
    pub refresh_interval: RefreshInterval,

    /// Whether embedded videos start playing automatically
    #[serde(default = "default_auto_play_videos")]
    pub auto_play_videos: bool,

    /// Number of posts to fetch per timeline page
    #[serde(default = "default_post_limit")]
    pub post_limit: usize,
}

fn default_auto_play_videos() -> bool {
    true
}

fn default_post_limit() -> usize {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval: RefreshInterval::default(),
            auto_play_videos: default_auto_play_videos(),
            post_limit: default_post_limit(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        crate::paths::settings_path()
    }

    /// Load config from the default path or create default
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_from(&path)
    }

    /// Load config from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_refresh_interval_durations() {
        assert_eq!(
            RefreshInterval::OneSecond.as_duration(),
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            RefreshInterval::FiveMinutes.as_duration(),
            Some(Duration::from_secs(300))
        );
        assert_eq!(RefreshInterval::Never.as_duration(), None);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let config = Config {
            refresh_interval: RefreshInterval::FiveSeconds,
            auto_play_videos: false,
            post_limit: 30,
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.refresh_interval, RefreshInterval::FiveSeconds);
        assert!(!loaded.auto_play_videos);
        assert_eq!(loaded.post_limit, 30);
    }

    #[test]
    fn test_missing_file_yields_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.refresh_interval, RefreshInterval::ThirtySeconds);
    }
}
