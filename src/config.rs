//! Engine configuration, loadable from TOML.
//!
//! ```toml
//! video_queue_size = 30
//! playback_mode = "pingpong"
//!
//! [timers]
//! playback_ms = 5
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::playback::state::PlaybackMode;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Periods of the tick loop's timers, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub playback_ms: u64,
    pub queue_ms: u64,
    pub real_speed_ms: u64,
    pub cache_ms: u64,
    pub diagnostics_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            playback_ms: 10,
            queue_ms: 10,
            real_speed_ms: 1000,
            cache_ms: 500,
            diagnostics_ms: 500,
        }
    }
}

impl TimerConfig {
    pub fn playback(&self) -> Duration {
        Duration::from_millis(self.playback_ms)
    }

    pub fn queue(&self) -> Duration {
        Duration::from_millis(self.queue_ms)
    }

    pub fn real_speed(&self) -> Duration {
        Duration::from_millis(self.real_speed_ms)
    }

    pub fn cache(&self) -> Duration {
        Duration::from_millis(self.cache_ms)
    }

    pub fn diagnostics(&self) -> Duration {
        Duration::from_millis(self.diagnostics_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample frames per audio device callback
    pub buffer_frame_count: u32,
    pub video_queue_size: usize,
    pub audio_queue_size: usize,
    /// Decoder threads
    pub thread_count: usize,
    pub playback_mode: PlaybackMode,
    pub cache_enabled: bool,
    pub cache_max_bytes: usize,
    pub volume: f32,
    pub mute: bool,
    pub timers: TimerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_frame_count: 256,
            video_queue_size: 30,
            audio_queue_size: 30,
            thread_count: 4,
            playback_mode: PlaybackMode::Loop,
            cache_enabled: true,
            cache_max_bytes: 256 * 1024 * 1024,
            volume: 1.0,
            mute: false,
            timers: TimerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.video_queue_size == 0 || self.audio_queue_size == 0 {
            return Err(ConfigError::Invalid("queue sizes must be at least 1".to_string()));
        }
        if self.buffer_frame_count == 0 {
            return Err(ConfigError::Invalid("buffer_frame_count must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(ConfigError::Invalid(format!("volume {} outside 0..1", self.volume)));
        }
        Ok(())
    }
}
