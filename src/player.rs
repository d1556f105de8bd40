//! # Playback Orchestrator
//!
//! Wires a [`MusicQueue`] to the output mixer and runs the transport state
//! machine:
//!
//! ```text
//! Stopped ──play──▶ Playing ◀──play/pause──▶ Paused
//!    ▲                 │                        │
//!    └──────stop───────┴──────────stop──────────┘
//! ```
//!
//! ## Locking
//!
//! Every control operation takes the player lock for its whole duration, and
//! takes the mixer lock (the [`OutputHandle`]) only around swaps. The order is
//! always player, then mixer. The output pump only ever takes the mixer lock.
//!
//! ## Track-Finished Events
//!
//! When the installed stream drains, the mixer hands its finish callback to
//! the pump, which calls it outside the mixer lock. The callback spawns a
//! thread that advances the queue as if `next` had been called with a full
//! listen. Each installation carries a session number; an event whose
//! session has been replaced, or that arrives after a stop, does nothing.

use crate::buffer::{BufferedStream, CHUNK_FRAMES, DEFAULT_LOOKAHEAD};
use crate::error::{PlayerError, Result};
use crate::mixer::{FinishCallback, Streamer};
use crate::output::OutputHandle;
use crate::queue::MusicQueue;
use crate::resampler::Resampled;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// Transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Playing => "playing",
            Self::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// What any input front end (keyboard, remote) may ask of the player.
pub trait PlayerControls: Send + Sync {
    /// # Errors
    ///
    /// [`PlayerError::QueueEmpty`] when stopped with nothing to play.
    fn play(&self) -> Result<()>;

    fn pause(&self);

    fn stop(&self);

    /// # Errors
    ///
    /// Returns an error if the next track cannot be started; the player is
    /// stopped in that case.
    fn next(&self) -> Result<()>;

    /// # Errors
    ///
    /// As for [`next`](PlayerControls::next).
    fn previous(&self) -> Result<()>;

    /// Set volume in `[0, 1]`; out-of-range values are clamped.
    fn set_volume(&self, volume: f32);

    fn volume(&self) -> f32;

    fn state(&self) -> PlaybackState;

    fn current_path(&self) -> Option<PathBuf>;
}

/// Pipeline tuning.
#[derive(Debug, Clone, Copy)]
pub struct PlayerOptions {
    /// Read-ahead per track.
    pub lookahead: Duration,
    pub chunk_frames: usize,
    pub initial_volume: f32,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            lookahead: DEFAULT_LOOKAHEAD,
            chunk_frames: CHUNK_FRAMES,
            initial_volume: 1.0,
        }
    }
}

/// Position within the current track, in the track's own frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub position: u64,
    pub length: u64,
    pub sample_rate: u32,
}

impl Progress {
    /// Played fraction, clamped to `[0, 1]`; zero for zero-length tracks.
    #[must_use]
    pub fn fraction(&self) -> f32 {
        if self.length == 0 {
            0.0
        } else {
            (self.position as f64 / self.length as f64).min(1.0) as f32
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.position as f64 / f64::from(self.sample_rate.max(1)))
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.length as f64 / f64::from(self.sample_rate.max(1)))
    }
}

struct Transport {
    state: PlaybackState,
    queue: Box<dyn MusicQueue>,
    pipeline: Option<Arc<BufferedStream>>,
    session: u64,
    volume: f32,
}

struct Inner {
    transport: Mutex<Transport>,
    output: OutputHandle,
    options: PlayerOptions,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.output.lock().clear();
        if let Some(pipeline) = self.transport.get_mut().pipeline.take() {
            pipeline.close();
        }
    }
}

enum Step {
    Forward(f32),
    Back,
}

/// Cheap to clone; clones share one transport.
#[derive(Clone)]
pub struct Player {
    inner: Arc<Inner>,
}

impl Player {
    /// Take ownership of `queue` and drive `output`. Starts stopped.
    pub fn new(queue: Box<dyn MusicQueue>, output: OutputHandle, options: PlayerOptions) -> Self {
        let player = Self {
            inner: Arc::new(Inner {
                transport: Mutex::new(Transport {
                    state: PlaybackState::Stopped,
                    queue,
                    pipeline: None,
                    session: 0,
                    volume: 1.0,
                }),
                output,
                options,
            }),
        };
        player.set_volume(options.initial_volume);
        player
    }

    fn lock(&self) -> MutexGuard<'_, Transport> {
        self.inner.transport.lock()
    }

    /// Seek within the current track.
    ///
    /// # Errors
    ///
    /// [`PlayerError::Seek`] if nothing is playing or the position is out of
    /// range. Playback continues either way.
    pub fn seek(&self, position: Duration) -> Result<()> {
        let transport = self.lock();
        let pipeline = transport
            .pipeline
            .as_ref()
            .ok_or_else(|| PlayerError::Seek("nothing is playing".to_string()))?;
        let format = transport
            .queue
            .current()
            .map(|track| track.format())
            .ok_or_else(|| PlayerError::Seek("no current track".to_string()))?;
        let frame = format.frames_for(position) as u64;
        debug!("Seeking to {position:?} (frame {frame})");
        pipeline.seek(frame)
    }

    /// Position in the current track, if one is loaded.
    #[must_use]
    pub fn progress(&self) -> Option<Progress> {
        Self::progress_of(&self.lock())
    }

    /// Paths already played this session.
    #[must_use]
    pub fn history(&self) -> Vec<PathBuf> {
        self.lock().queue.history().to_vec()
    }

    fn progress_of(transport: &Transport) -> Option<Progress> {
        let track = transport.queue.current()?;
        let position = transport.pipeline.as_ref().map_or(0, |p| p.position());
        Some(Progress {
            position,
            length: track.len(),
            sample_rate: track.format().sample_rate,
        })
    }

    /// Session number of the current installation.
    #[cfg(test)]
    fn session(&self) -> u64 {
        self.lock().session
    }

    /// Install the queue's current track as the sole mixer source.
    fn begin_playback(&self, transport: &mut Transport) -> Result<()> {
        let options = self.inner.options;
        let output_rate = self.inner.output.sample_rate();

        let track = transport
            .queue
            .current_mut()
            .ok_or(PlayerError::QueueEmpty)?;
        track.reopen()?;
        let source = track
            .source()
            .ok_or_else(|| PlayerError::decode(track.path(), "track has no open source"))?;
        let format = track.format();
        info!("Playing {}", track.path().display());

        let pipeline = Arc::new(BufferedStream::with_chunk_frames(
            source,
            format,
            options.lookahead,
            options.chunk_frames,
        )?);
        let streamer: Box<dyn Streamer> = if format.sample_rate == output_rate {
            Box::new(Arc::clone(&pipeline))
        } else {
            Box::new(Resampled::new(
                Arc::clone(&pipeline),
                format.sample_rate,
                output_rate,
            )?)
        };

        transport.session += 1;
        let on_finish = self.finish_callback(transport.session);
        {
            let mut mixer = self.inner.output.lock();
            mixer.set_silent(transport.volume <= 0.0);
            mixer.play(streamer, on_finish);
        }
        if let Some(old) = transport.pipeline.replace(pipeline) {
            old.close();
        }
        transport.state = PlaybackState::Playing;
        Ok(())
    }

    /// Detach and close everything belonging to the current track.
    fn release(&self, transport: &mut Transport) {
        self.inner.output.lock().clear();
        if let Some(pipeline) = transport.pipeline.take() {
            pipeline.close();
        }
        if let Some(track) = transport.queue.current_mut() {
            track.close();
        }
    }

    fn stop_locked(&self, transport: &mut Transport) {
        {
            let mut mixer = self.inner.output.lock();
            mixer.set_silent(true);
            mixer.set_paused(false);
        }
        self.release(transport);
        transport.queue.clear();
        transport.session += 1;
        if transport.state != PlaybackState::Stopped {
            info!("Stopped");
        }
        transport.state = PlaybackState::Stopped;
    }

    fn advance(&self, transport: &mut Transport, step: Step) -> Result<()> {
        self.release(transport);
        let found = match step {
            Step::Forward(fraction) => transport.queue.next(fraction).is_some(),
            Step::Back => transport.queue.previous().is_some(),
        };
        if !found {
            info!("Nothing left to play");
            self.stop_locked(transport);
            return Ok(());
        }

        let result = self.begin_playback(transport);
        if let Err(e) = &result {
            error!("Failed to start track: {e}");
            self.stop_locked(transport);
        }
        result
    }

    fn finish_callback(&self, session: u64) -> FinishCallback {
        let inner = Arc::downgrade(&self.inner);
        Box::new(move || {
            let spawned = thread::Builder::new()
                .name("track-finished".to_string())
                .spawn(move || Self::track_finished(&inner, session));
            if let Err(e) = spawned {
                error!("Failed to dispatch track-finished event: {e}");
            }
        })
    }

    fn track_finished(inner: &Weak<Inner>, session: u64) {
        if let Some(inner) = inner.upgrade() {
            Self { inner }.on_track_finished(session);
        }
    }

    /// Advance after the stream of `session` drained.
    fn on_track_finished(&self, session: u64) {
        let mut transport = self.lock();
        if transport.state == PlaybackState::Stopped || transport.session != session {
            debug!("Ignoring stale track-finished event for session {session}");
            return;
        }
        if let Err(e) = self.advance(&mut transport, Step::Forward(1.0)) {
            warn!("Could not continue after track finished: {e}");
        }
    }
}

impl PlayerControls for Player {
    fn play(&self) -> Result<()> {
        let mut transport = self.lock();
        match transport.state {
            PlaybackState::Playing => Ok(()),
            PlaybackState::Paused => {
                self.inner.output.lock().set_paused(false);
                transport.state = PlaybackState::Playing;
                info!("Resumed");
                Ok(())
            }
            PlaybackState::Stopped => {
                if transport.queue.current().is_none() {
                    return Err(PlayerError::QueueEmpty);
                }
                self.begin_playback(&mut transport)
            }
        }
    }

    fn pause(&self) {
        let mut transport = self.lock();
        if transport.state == PlaybackState::Playing {
            self.inner.output.lock().set_paused(true);
            transport.state = PlaybackState::Paused;
            info!("Paused");
        }
    }

    fn stop(&self) {
        let mut transport = self.lock();
        self.stop_locked(&mut transport);
    }

    fn next(&self) -> Result<()> {
        let mut transport = self.lock();
        let fraction = Self::progress_of(&transport).map_or(0.0, |p| p.fraction());
        debug!("Skipping after {:.1}% of the track", fraction * 100.0);
        self.advance(&mut transport, Step::Forward(fraction))
    }

    fn previous(&self) -> Result<()> {
        let mut transport = self.lock();
        self.advance(&mut transport, Step::Back)
    }

    fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        let mut transport = self.lock();
        transport.volume = volume;

        let mut mixer = self.inner.output.lock();
        if volume <= 0.0 {
            mixer.set_silent(true);
        } else {
            mixer.set_silent(transport.state == PlaybackState::Stopped);
            mixer.set_level(volume * 2.0 - 1.0);
        }
        debug!("Volume {volume:.2}");
    }

    fn volume(&self) -> f32 {
        self.lock().volume
    }

    fn state(&self) -> PlaybackState {
        self.lock().state
    }

    fn current_path(&self) -> Option<PathBuf> {
        self.lock()
            .queue
            .current()
            .map(|track| track.path().to_path_buf())
    }
}
