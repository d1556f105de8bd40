//! A personal streaming audio player with an adaptive, embedding-driven queue.
//!
//! Every track in the library carries an embedding vector. The player keeps a
//! running "taste" vector and nudges it towards tracks that were listened to
//! and away from tracks that were skipped, then picks the unplayed track whose
//! embedding is closest to the taste.
//!
//! Core modules:
//! - [`algorithm`] - Vector math and the learning rule
//! - [`queue`] - Adaptive and shuffled queues behind [`queue::MusicQueue`]
//! - [`buffer`] - Read-ahead pipeline between a decoder and the output
//! - [`player`] - Transport state machine and track-finished handling
//! - [`output`] - Audio device and the [`mixer`] it pulls from
//!
//! ### Supporting Modules
//!
//! - [`source`] - Sample source and codec traits, in-memory implementations
//! - [`decoder`] - Symphonia-backed codec
//! - [`resampler`] - Rate conversion to the output rate
//! - [`track`] - A library entry with an open or closed decoder
//! - [`library`] - Embedding library loading and audio file discovery
//! - [`controller`] - Line-oriented keyboard control
//! - [`config`] - Configuration file and platform directories
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//! - [`error`] - The crate error type
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use pod_shuffle::{
//!     AdaptiveQueue, AudioOutput, LearningContext, Library, Player, PlayerControls,
//!     PlayerOptions, SymphoniaCodec,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let library = Arc::new(Library::load(Path::new("embeddings.json"))?);
//! let output = AudioOutput::open(44_100, Duration::from_millis(250))?;
//! let queue = AdaptiveQueue::new(
//!     library,
//!     Arc::new(SymphoniaCodec),
//!     LearningContext::default(),
//!     &mut rand::thread_rng(),
//! );
//! let player = Player::new(Box::new(queue), output.handle(), PlayerOptions::default());
//! player.play()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Learning Rule
//!
//! On every transition the outgoing track's played fraction `p` becomes a
//! score on an S-curve centered at `p = 0.5`: negative for early skips,
//! positive for full listens. The taste moves towards (or away from) the
//! track's embedding by `score * lr`, and the learning rate shrinks as
//! inertia grows.
//!
//! ## Error Handling
//!
//! Library functions return [`error::Result`] with [`PlayerError`]. The
//! binary wraps these in `anyhow` for context.

pub mod algorithm;
pub mod buffer;
pub mod cli;
pub mod completion;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod library;
pub mod mixer;
pub mod output;
pub mod player;
pub mod queue;
pub mod resampler;
pub mod source;
pub mod track;

pub use algorithm::LearningContext;
pub use buffer::BufferedStream;
pub use decoder::SymphoniaCodec;
pub use error::PlayerError;
pub use library::Library;
pub use output::{AudioOutput, OutputHandle};
pub use player::{PlaybackState, Player, PlayerControls, PlayerOptions};
pub use queue::{AdaptiveQueue, MusicQueue, ShuffledQueue};
pub use source::{CodecAdapter, Format, Frame, SampleSource};
