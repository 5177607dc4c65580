//! TOML configuration with atomic persistence.
//!
//! Player settings survive restarts; writes go through a temp file plus
//! rename so a crash mid-write never leaves a truncated config behind.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub(crate) const VOLUME_MAX: u8 = 100;
pub(crate) const BUFFER_SECS_MIN: u32 = 1;
pub(crate) const BUFFER_SECS_MAX: u32 = 60;
pub(crate) const CACHE_SECS_MAX: u32 = 10;

/// Top-level config file shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct AppConfig {
    /// HTTP bind address, e.g. `0.0.0.0:8080`.
    pub bind: Option<String>,
    #[serde(default)]
    pub player: PlayerSettings,
}

/// Persisted playback parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct PlayerSettings {
    /// Last stream URL, empty when never started.
    #[serde(default)]
    pub url: String,
    /// ALSA output device; empty means auto-detect at launch.
    #[serde(default)]
    pub output_device: String,
    /// Volume 0..=100.
    #[serde(default = "default_volume")]
    pub volume: u8,
    /// Network buffer depth in seconds.
    #[serde(default = "default_buffer_secs")]
    pub buffer_secs: u32,
    /// Extra local cache in seconds before audio starts.
    #[serde(default = "default_cache_secs")]
    pub playback_cache_secs: u32,
}

fn default_volume() -> u8 {
    100
}

fn default_buffer_secs() -> u32 {
    10
}

fn default_cache_secs() -> u32 {
    3
}

impl Default for PlayerSettings {
    fn default() -> Self {
        PlayerSettings {
            url: String::new(),
            output_device: String::new(),
            volume: default_volume(),
            buffer_secs: default_buffer_secs(),
            playback_cache_secs: default_cache_secs(),
        }
    }
}

impl PlayerSettings {
    /// Clamp every numeric field into its valid range.
    pub(crate) fn normalized(mut self) -> Self {
        self.volume = self.volume.min(VOLUME_MAX);
        self.buffer_secs = self.buffer_secs.clamp(BUFFER_SECS_MIN, BUFFER_SECS_MAX);
        self.playback_cache_secs = self.playback_cache_secs.min(CACHE_SECS_MAX);
        self
    }
}

/// Loads and saves the config file at a fixed path.
#[derive(Debug, Clone)]
pub(crate) struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        ConfigStore { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Read the config; a missing file yields defaults, a malformed file
    /// is an error so a typo does not silently reset settings.
    pub(crate) fn load(&self) -> anyhow::Result<AppConfig> {
        if !self.path.exists() {
            return Ok(AppConfig::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read config file: {}", self.path.display()))?;
        let config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", self.path.display()))?;
        Ok(config)
    }

    /// Replace the player section and write the whole file atomically.
    pub(crate) fn save_player(&self, player: &PlayerSettings) -> anyhow::Result<()> {
        let mut config = self.load().unwrap_or_default();
        config.player = player.clone().normalized();
        let rendered = toml::to_string_pretty(&config).context("failed to render config")?;
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, rendered)
            .with_context(|| format!("failed to write temp config: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace config: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let store = ConfigStore::new("/nonexistent/stream-hub-test.toml");
        let config = store.load().unwrap();
        assert_eq!(config.player, PlayerSettings::default());
        assert_eq!(config.player.volume, 100);
        assert_eq!(config.player.buffer_secs, 10);
        assert_eq!(config.player.playback_cache_secs, 3);
    }

    #[test]
    fn normalized_clamps_every_field() {
        let settings = PlayerSettings {
            volume: 250,
            buffer_secs: 0,
            playback_cache_secs: 99,
            ..PlayerSettings::default()
        }
        .normalized();
        assert_eq!(settings.volume, 100);
        assert_eq!(settings.buffer_secs, 1);
        assert_eq!(settings.playback_cache_secs, 10);

        let settings = PlayerSettings {
            buffer_secs: 600,
            ..PlayerSettings::default()
        }
        .normalized();
        assert_eq!(settings.buffer_secs, 60);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join("stream-hub-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        let _ = std::fs::remove_file(&path);

        let store = ConfigStore::new(&path);
        let player = PlayerSettings {
            url: "http://radio.example/stream".to_string(),
            output_device: "plughw:1,0".to_string(),
            volume: 80,
            buffer_secs: 15,
            playback_cache_secs: 5,
        };
        store.save_player(&player).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.player, player);
        assert!(!path.with_extension("toml.tmp").exists());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: AppConfig = toml::from_str("[player]\nurl = \"http://x/y\"\n").unwrap();
        assert_eq!(config.player.url, "http://x/y");
        assert_eq!(config.player.volume, 100);
        assert_eq!(config.player.buffer_secs, 10);
    }
}
