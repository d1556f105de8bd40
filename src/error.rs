//! Error types for the player core.
//!
//! The library surface reports failures through [`PlayerError`] so callers can
//! tell an exhausted queue apart from a broken file or a missing device. The
//! binary wraps these in `anyhow` for context.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the queue, pipeline, output and orchestrator.
#[derive(Error, Debug)]
pub enum PlayerError {
    /// Nothing left to play. Not a failure: callers may wait, reload or exit.
    #[error("queue is empty")]
    QueueEmpty,

    /// A track could not be opened or decoded.
    #[error("failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    /// Seeking the active stream failed. The stream keeps playing.
    #[error("seek failed: {0}")]
    Seek(String),

    /// Sample-rate conversion could not be set up or failed mid-stream.
    #[error("resampling failed: {0}")]
    Resample(String),

    /// The output device could not be opened or driven.
    #[error("audio output error: {0}")]
    Output(String),

    /// The embedding library is unusable.
    #[error("library error: {0}")]
    Library(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PlayerError {
    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience result alias for the player core.
pub type Result<T> = std::result::Result<T, PlayerError>;
