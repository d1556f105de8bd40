//! # Command-Line Interface Module
//!
//! Clap derive definitions for pod-shuffle. Flags given here override the
//! values loaded from the configuration file.
//!
//! ## Commands
//!
//! - `play`: Start the player on an embedding library
//! - `info`: Summarize a library file
//! - `scan`: List audio files under a directory that have no embedding
//! - `completion`: Print a shell completion script
//!
//! ## Examples
//!
//! ```bash
//! pod-shuffle play ~/Music/embeddings.json
//! pod-shuffle play --mode shuffle --volume 0.6
//! pod-shuffle scan ~/Music --library ~/Music/embeddings.json
//! ```

use crate::config::QueueMode;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "pod-shuffle")]
#[command(about = "pod-shuffle: a shuffle player that learns from what you skip")]
#[command(version)]
pub struct Args {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// All available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play tracks from an embedding library
    ///
    /// Opens the default audio device and starts playing. Control playback by
    /// typing keys followed by Enter: space toggles play/pause, `n` skips,
    /// `p` goes back, `+`/`-` change volume, `s` stops and `q` quits.
    ///
    /// In adaptive mode, skipping a track early steers the queue away from
    /// tracks like it; listening to the end steers towards them.
    Play {
        /// Library JSON file (defaults to `library` from the config file)
        library: Option<PathBuf>,

        /// How the next track is chosen
        #[arg(long, value_enum)]
        mode: Option<QueueMode>,

        /// Starting volume between 0.0 and 1.0
        #[arg(long)]
        volume: Option<f32>,

        /// Output sample rate in Hz
        #[arg(long)]
        sample_rate: Option<u32>,

        /// Read-ahead per track in milliseconds
        #[arg(long)]
        buffer_ms: Option<u64>,

        /// Decode and mix without opening an audio device
        ///
        /// Blocks are rendered and discarded in real time. Useful on
        /// machines without sound hardware.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show statistics about a library file
    ///
    /// Prints how many entries the file lists, how many are usable, the
    /// embedding dimension and how many entries point at missing files.
    Info {
        /// Library JSON file
        library: PathBuf,
    },

    /// Find audio files without an embedding
    ///
    /// Walks DIR for supported audio files (MP3, FLAC, WAV, OGG, M4A) and
    /// prints those not present in the library.
    Scan {
        /// Directory to scan recursively
        dir: PathBuf,

        /// Library JSON file to compare against
        #[arg(long)]
        library: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    ///
    /// Install with, for example:
    /// `pod-shuffle completion fish > ~/.config/fish/completions/pod-shuffle.fish`
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_play_flags() {
        let args = Args::parse_from([
            "pod-shuffle",
            "play",
            "lib.json",
            "--mode",
            "shuffle",
            "--volume",
            "0.3",
            "--dry-run",
        ]);

        match args.command {
            Command::Play {
                library,
                mode,
                volume,
                sample_rate,
                dry_run,
                ..
            } => {
                assert_eq!(library, Some(PathBuf::from("lib.json")));
                assert_eq!(mode, Some(QueueMode::Shuffle));
                assert_eq!(volume, Some(0.3));
                assert_eq!(sample_rate, None);
                assert!(dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_completion_shell_names() {
        let args = Args::parse_from(["pod-shuffle", "completion", "power-shell"]);
        assert!(matches!(
            args.command,
            Command::Completion {
                shell: Shell::PowerShell
            }
        ));
    }
}
