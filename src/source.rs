//! # Sample Sources
//!
//! The contract between the player and whatever produces decoded audio.
//!
//! A [`SampleSource`] yields stereo [`Frame`]s on demand, can seek to a frame
//! offset and reports its length. A [`CodecAdapter`] turns a path into such a
//! source plus its [`Format`]. The production adapter lives in
//! [`crate::decoder`]; the in-memory variants here back tests, benches and
//! `--dry-run` playback.

use crate::error::{PlayerError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One stereo sample frame, left then right.
pub type Frame = [f32; 2];

/// Sample rate and channel layout of a decoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Format {
    #[must_use]
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Number of frames covering `duration` at this sample rate.
    #[must_use]
    pub fn frames_for(&self, duration: Duration) -> usize {
        (duration.as_secs_f64() * f64::from(self.sample_rate)).round() as usize
    }
}

/// A seekable stream of decoded frames.
///
/// `stream` fills as much of `buf` as it can and returns `(filled, ok)`;
/// `ok == false` means the source is drained (or failed, see [`err`]).
///
/// [`err`]: SampleSource::err
pub trait SampleSource: Send {
    fn stream(&mut self, buf: &mut [Frame]) -> (usize, bool);

    /// Seek to an absolute frame offset.
    ///
    /// # Errors
    ///
    /// Returns [`PlayerError::Seek`] when the offset is out of range or the
    /// underlying reader refuses.
    fn seek(&mut self, position: u64) -> Result<()>;

    fn position(&self) -> u64;

    /// Total number of frames.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the underlying file handle. Further reads yield nothing.
    fn close(&mut self);

    /// Terminal error that ended the stream early, if any.
    fn err(&self) -> Option<String> {
        None
    }
}

/// Opens decoded sources for library paths.
pub trait CodecAdapter: Send + Sync {
    /// # Errors
    ///
    /// Returns [`PlayerError::Decode`] if the file is missing or unsupported.
    fn open(&self, path: &Path) -> Result<(Box<dyn SampleSource>, Format)>;
}

/// Decoded audio held entirely in memory.
pub struct MemorySource {
    frames: Arc<[Frame]>,
    position: usize,
    closed: bool,
    close_counter: Option<Arc<AtomicUsize>>,
}

impl MemorySource {
    #[must_use]
    pub fn new(frames: impl Into<Arc<[Frame]>>) -> Self {
        Self {
            frames: frames.into(),
            position: 0,
            closed: false,
            close_counter: None,
        }
    }

    /// Count every `close` call into `counter`.
    #[must_use]
    pub fn with_close_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.close_counter = Some(counter);
        self
    }
}

impl SampleSource for MemorySource {
    fn stream(&mut self, buf: &mut [Frame]) -> (usize, bool) {
        if self.closed || self.position >= self.frames.len() {
            return (0, false);
        }
        let n = buf.len().min(self.frames.len() - self.position);
        buf[..n].copy_from_slice(&self.frames[self.position..self.position + n]);
        self.position += n;
        (n, true)
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        let len = self.frames.len() as u64;
        if position > len {
            return Err(PlayerError::Seek(format!(
                "position {position} out of range (length {len})"
            )));
        }
        self.position = position as usize;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn len(&self) -> u64 {
        self.frames.len() as u64
    }

    fn close(&mut self) {
        self.closed = true;
        if let Some(counter) = &self.close_counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct MemoryEntry {
    frames: Arc<[Frame]>,
    format: Format,
    closes: Arc<AtomicUsize>,
    opens: Arc<AtomicUsize>,
}

/// A codec over a fixed set of in-memory tracks.
///
/// Paths that were never registered fail to open, which makes it easy to
/// exercise the skip-on-decode-failure paths.
#[derive(Default)]
pub struct MemoryCodec {
    tracks: HashMap<PathBuf, MemoryEntry>,
}

impl MemoryCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` as `frames` decoded at `format`.
    pub fn insert(&mut self, path: impl Into<PathBuf>, frames: Vec<Frame>, format: Format) {
        self.tracks.insert(
            path.into(),
            MemoryEntry {
                frames: frames.into(),
                format,
                closes: Arc::new(AtomicUsize::new(0)),
                opens: Arc::new(AtomicUsize::new(0)),
            },
        );
    }

    /// Register `path` as `frames` frames of a quiet constant signal.
    pub fn insert_silence(&mut self, path: impl Into<PathBuf>, frames: usize, format: Format) {
        self.insert(path, vec![[0.25, -0.25]; frames], format);
    }

    /// How many handles for `path` have been closed so far.
    #[must_use]
    pub fn closes(&self, path: &Path) -> usize {
        self.tracks
            .get(path)
            .map_or(0, |entry| entry.closes.load(Ordering::SeqCst))
    }

    /// How many handles for `path` have been opened so far.
    #[must_use]
    pub fn opens(&self, path: &Path) -> usize {
        self.tracks
            .get(path)
            .map_or(0, |entry| entry.opens.load(Ordering::SeqCst))
    }
}

impl CodecAdapter for MemoryCodec {
    fn open(&self, path: &Path) -> Result<(Box<dyn SampleSource>, Format)> {
        let entry = self
            .tracks
            .get(path)
            .ok_or_else(|| PlayerError::decode(path, "no such in-memory track"))?;
        entry.opens.fetch_add(1, Ordering::SeqCst);
        let source: Box<dyn SampleSource> = Box::new(
            MemorySource::new(Arc::clone(&entry.frames))
                .with_close_counter(Arc::clone(&entry.closes)),
        );
        Ok((source, entry.format))
    }
}
