//! # Configuration Module
//!
//! Player settings with defaults, optionally overridden by a JSON file in the
//! platform configuration directory and then by command-line flags.
//!
//! ## Location
//!
//! - Linux: `~/.config/pod-shuffle/config.json`
//! - macOS: `~/Library/Application Support/pod-shuffle/config.json`
//! - Windows: `%APPDATA%\pod-shuffle\config.json`
//!
//! Every field is optional in the file; missing ones keep their default.
//!
//! ```json
//! { "output_sample_rate": 48000, "buffer_ms": 3000, "mode": "shuffle" }
//! ```

use crate::error::PlayerError;
use crate::player::PlayerOptions;
use anyhow::{Context, Result};
use clap::ValueEnum;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "pod-shuffle";
const CONFIG_FILE: &str = "config.json";

/// How the next track is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    /// Learn from skips and full listens; pick by embedding similarity.
    #[default]
    Adaptive,
    /// Plain random order.
    Shuffle,
}

/// Runtime settings for playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Fixed device rate; tracks at other rates are resampled.
    pub output_sample_rate: u32,
    /// Read-ahead per track, in milliseconds.
    pub buffer_ms: u64,
    /// Frames per buffered chunk.
    pub chunk_frames: usize,
    /// Length of one block pulled from the mixer, in milliseconds.
    pub output_block_ms: u64,
    /// Volume in `[0, 1]` at startup.
    pub initial_volume: f32,
    pub mode: QueueMode,
    /// Library file used when none is given on the command line.
    pub library: Option<PathBuf>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: 44_100,
            buffer_ms: 2_000,
            chunk_frames: 4_096,
            output_block_ms: 250,
            initial_volume: 1.0,
            mode: QueueMode::Adaptive,
            library: None,
        }
    }
}

impl PlayerConfig {
    /// Load from the default location, falling back to defaults when the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration directory cannot be determined,
    /// or the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if path.is_file() {
            Self::load_from(&path)
        } else {
            debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// # Errors
    ///
    /// Returns an error if `path` cannot be read, is not valid JSON, or holds
    /// out-of-range values.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject values the player cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`PlayerError::Config`] naming the offending field.
    pub fn validate(&self) -> std::result::Result<(), PlayerError> {
        if self.output_sample_rate == 0 {
            return Err(PlayerError::Config(
                "output_sample_rate must be positive".to_string(),
            ));
        }
        if self.chunk_frames == 0 {
            return Err(PlayerError::Config("chunk_frames must be positive".to_string()));
        }
        if self.output_block_ms == 0 {
            return Err(PlayerError::Config(
                "output_block_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.initial_volume) {
            return Err(PlayerError::Config(format!(
                "initial_volume {} is outside [0, 1]",
                self.initial_volume
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn lookahead(&self) -> Duration {
        Duration::from_millis(self.buffer_ms)
    }

    #[must_use]
    pub fn output_block(&self) -> Duration {
        Duration::from_millis(self.output_block_ms)
    }

    #[must_use]
    pub fn player_options(&self) -> PlayerOptions {
        PlayerOptions {
            lookahead: self.lookahead(),
            chunk_frames: self.chunk_frames,
            initial_volume: self.initial_volume,
        }
    }
}

/// Platform configuration directory for this program.
///
/// # Errors
///
/// Returns an error if the platform has no configuration directory.
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine the system configuration directory"))?;
    Ok(base.join(APP_DIR))
}

/// Full path of the configuration file (which may not exist).
///
/// # Errors
///
/// As for [`config_dir`].
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}
