//! Line-oriented keyboard controller.
//!
//! Reads commands from any [`BufRead`] (stdin in the binary) and drives a
//! [`PlayerControls`]. A line is either one command word (`next`, `vol+`,
//! ...) or a run of single-key commands applied in order, so `nn` skips
//! twice.
//!
//! | Key     | Word              | Action            |
//! |---------|-------------------|-------------------|
//! | space   | `play`, `pause`   | toggle play/pause |
//! | `n`     | `next`            | next track        |
//! | `p`     | `prev`            | previous track    |
//! | `+`     | `vol+`, `up`      | volume +0.05      |
//! | `-`     | `vol-`, `down`    | volume −0.05      |
//! | `s`     | `stop`            | stop              |
//! | `i`     | `status`          | print status      |
//! | `q`     | `quit`, `exit`    | stop and quit     |

use crate::error::Result;
use crate::player::{PlaybackState, PlayerControls};
use log::{debug, warn};
use std::io::BufRead;

/// Volume change per key press.
pub const VOLUME_STEP: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TogglePlay,
    Next,
    Previous,
    VolumeUp,
    VolumeDown,
    Stop,
    Status,
    Quit,
}

impl Command {
    #[must_use]
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            ' ' => Some(Self::TogglePlay),
            'n' | 'N' => Some(Self::Next),
            'p' | 'P' => Some(Self::Previous),
            '+' | '=' => Some(Self::VolumeUp),
            '-' | '_' => Some(Self::VolumeDown),
            's' | 'S' => Some(Self::Stop),
            'i' | 'I' => Some(Self::Status),
            'q' | 'Q' => Some(Self::Quit),
            _ => None,
        }
    }

    #[must_use]
    pub fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "play" | "pause" | "toggle" => Some(Self::TogglePlay),
            "next" | "skip" => Some(Self::Next),
            "prev" | "previous" | "back" => Some(Self::Previous),
            "vol+" | "up" | "louder" => Some(Self::VolumeUp),
            "vol-" | "down" | "quieter" => Some(Self::VolumeDown),
            "stop" => Some(Self::Stop),
            "status" | "info" => Some(Self::Status),
            "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Commands on one input line. An empty line (just Enter) toggles playback.
#[must_use]
pub fn parse_line(line: &str) -> Vec<Command> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return vec![Command::TogglePlay];
    }
    if let Some(command) = Command::from_word(line.trim()) {
        return vec![command];
    }
    line.chars().filter_map(Command::from_key).collect()
}

/// Whether the controller should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Run one command against `player`.
pub fn apply(command: Command, player: &dyn PlayerControls) -> Flow {
    debug!("Command {command:?}");
    match command {
        Command::TogglePlay => {
            if player.state() == PlaybackState::Playing {
                player.pause();
            } else if let Err(e) = player.play() {
                warn!("Cannot play: {e}");
            }
        }
        Command::Next => {
            if let Err(e) = player.next() {
                warn!("Next failed: {e}");
                player.stop();
            }
        }
        Command::Previous => {
            if let Err(e) = player.previous() {
                warn!("Previous failed: {e}");
                player.stop();
            }
        }
        Command::VolumeUp => player.set_volume(player.volume() + VOLUME_STEP),
        Command::VolumeDown => player.set_volume(player.volume() - VOLUME_STEP),
        Command::Stop => player.stop(),
        Command::Status => println!("{}", status_line(player)),
        Command::Quit => {
            player.stop();
            return Flow::Quit;
        }
    }
    Flow::Continue
}

/// One-line summary of the player.
#[must_use]
pub fn status_line(player: &dyn PlayerControls) -> String {
    let track = player
        .current_path()
        .map_or_else(|| "-".to_string(), |path| path.display().to_string());
    format!(
        "[{}] vol {:>3.0}% {track}",
        player.state(),
        player.volume() * 100.0
    )
}

/// Reads command lines and applies them until `quit` or end of input.
pub struct LineController<R> {
    input: R,
}

impl<R: BufRead> LineController<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    /// Print the key map, then process input until `quit` or EOF. The player
    /// is stopped on return.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the input fails.
    pub fn run(&mut self, player: &dyn PlayerControls) -> Result<()> {
        println!(
            "Controls: [space/enter] play/pause  n next  p prev  + vol up  - vol down  s stop  i status  q quit"
        );

        let mut line = String::new();
        loop {
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                debug!("Controller input closed");
                player.stop();
                return Ok(());
            }
            for command in parse_line(&line) {
                if apply(command, player) == Flow::Quit {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlayerError;
    use parking_lot::Mutex;
    use std::io::Cursor;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
        volume: Mutex<f32>,
        state: Mutex<Option<PlaybackState>>,
        fail_next: bool,
    }

    impl Recorder {
        fn record(&self, call: &'static str) {
            self.calls.lock().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }
    }

    impl PlayerControls for Recorder {
        fn play(&self) -> Result<()> {
            self.record("play");
            *self.state.lock() = Some(PlaybackState::Playing);
            Ok(())
        }

        fn pause(&self) {
            self.record("pause");
            *self.state.lock() = Some(PlaybackState::Paused);
        }

        fn stop(&self) {
            self.record("stop");
            *self.state.lock() = Some(PlaybackState::Stopped);
        }

        fn next(&self) -> Result<()> {
            self.record("next");
            if self.fail_next {
                Err(PlayerError::QueueEmpty)
            } else {
                Ok(())
            }
        }

        fn previous(&self) -> Result<()> {
            self.record("previous");
            Ok(())
        }

        fn set_volume(&self, volume: f32) {
            *self.volume.lock() = volume.clamp(0.0, 1.0);
        }

        fn volume(&self) -> f32 {
            *self.volume.lock()
        }

        fn state(&self) -> PlaybackState {
            self.state.lock().unwrap_or(PlaybackState::Stopped)
        }

        fn current_path(&self) -> Option<PathBuf> {
            None
        }
    }

    #[test]
    fn test_parse_keys_and_words() {
        assert_eq!(parse_line("n\n"), vec![Command::Next]);
        assert_eq!(parse_line("nn+"), vec![Command::Next, Command::Next, Command::VolumeUp]);
        assert_eq!(parse_line("prev\n"), vec![Command::Previous]);
        assert_eq!(parse_line("QUIT"), vec![Command::Quit]);
        assert_eq!(parse_line("\n"), vec![Command::TogglePlay]);
        assert_eq!(parse_line(" "), vec![Command::TogglePlay]);
        assert!(parse_line("xyz").is_empty());
    }

    #[test]
    fn test_toggle_switches_between_play_and_pause() {
        let player = Recorder::default();
        apply(Command::TogglePlay, &player);
        apply(Command::TogglePlay, &player);
        apply(Command::TogglePlay, &player);

        assert_eq!(player.calls(), vec!["play", "pause", "play"]);
    }

    #[test]
    fn test_failed_next_stops_player() {
        let player = Recorder {
            fail_next: true,
            ..Recorder::default()
        };
        assert_eq!(apply(Command::Next, &player), Flow::Continue);
        assert_eq!(player.calls(), vec!["next", "stop"]);
    }

    #[test]
    fn test_volume_steps_are_clamped() {
        let player = Recorder::default();
        player.set_volume(0.98);
        apply(Command::VolumeUp, &player);
        assert_eq!(player.volume(), 1.0);

        player.set_volume(0.5);
        apply(Command::VolumeDown, &player);
        assert!((player.volume() - 0.45).abs() < 1e-6);
    }

    #[test]
    fn test_run_stops_at_quit() -> Result<()> {
        let player = Recorder::default();
        let input = Cursor::new("n\np\nq\nn\n");
        LineController::new(input).run(&player)?;

        assert_eq!(player.calls(), vec!["next", "previous", "stop"]);
        Ok(())
    }

    #[test]
    fn test_run_stops_player_at_eof() -> Result<()> {
        let player = Recorder::default();
        LineController::new(Cursor::new("")).run(&player)?;

        assert_eq!(player.calls(), vec!["stop"]);
        Ok(())
    }
}
