//! A library entry that may or may not currently hold an open decoder.

use crate::error::Result;
use crate::library::Embedding;
use crate::source::{CodecAdapter, Format, SampleSource};
use log::{debug, trace};
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Decoded source shared between a track and the pipeline reading it.
pub type SourceHandle = Arc<Mutex<Box<dyn SampleSource>>>;

/// One track of the queue.
///
/// The decoder is materialized by [`Track::load`] or [`Track::reopen`] and
/// released by [`Track::close`] (or on drop). Closing is idempotent: the
/// underlying handle is closed at most once per open.
pub struct Track {
    path: PathBuf,
    embedding: Option<Embedding>,
    codec: Arc<dyn CodecAdapter>,
    handle: Option<SourceHandle>,
    format: Format,
    len: u64,
}

impl Track {
    /// Open `path` through `codec`.
    ///
    /// # Errors
    ///
    /// Propagates the codec's decode error.
    pub fn load(
        path: impl Into<PathBuf>,
        embedding: Option<Embedding>,
        codec: Arc<dyn CodecAdapter>,
    ) -> Result<Self> {
        let path = path.into();
        let (source, format) = codec.open(&path)?;
        let len = source.len();
        debug!(
            "Opened {} ({} Hz, {} ch, {len} frames)",
            path.display(),
            format.sample_rate,
            format.channels
        );
        Ok(Self {
            path,
            embedding,
            codec,
            handle: Some(Arc::new(Mutex::new(source))),
            format,
            len,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn embedding(&self) -> Option<&Embedding> {
        self.embedding.as_ref()
    }

    #[must_use]
    pub fn format(&self) -> Format {
        self.format
    }

    /// Total frames, as reported when the track was last opened.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// The open decoder, if any.
    #[must_use]
    pub fn source(&self) -> Option<SourceHandle> {
        self.handle.clone()
    }

    /// Re-materialize the decoder after a [`close`](Track::close). No-op when
    /// already open.
    ///
    /// # Errors
    ///
    /// Propagates the codec's decode error.
    pub fn reopen(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let (source, format) = self.codec.open(&self.path)?;
        self.len = source.len();
        self.format = format;
        self.handle = Some(Arc::new(Mutex::new(source)));
        trace!("Reopened {}", self.path.display());
        Ok(())
    }

    /// Release the decoder. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.lock().close();
            trace!("Closed {}", self.path.display());
        }
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("format", &self.format)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryCodec;

    fn codec() -> Arc<MemoryCodec> {
        let mut codec = MemoryCodec::new();
        codec.insert_silence("a.flac", 100, Format::new(44_100, 2));
        Arc::new(codec)
    }

    #[test]
    fn test_close_is_idempotent() -> Result<()> {
        let codec = codec();
        let mut track = Track::load("a.flac", None, codec.clone())?;
        track.close();
        track.close();
        drop(track);

        assert_eq!(codec.closes(Path::new("a.flac")), 1);
        Ok(())
    }

    #[test]
    fn test_reopen_after_close() -> Result<()> {
        let codec = codec();
        let mut track = Track::load("a.flac", None, codec.clone())?;
        track.close();
        assert!(!track.is_open());

        track.reopen()?;
        assert!(track.is_open());
        assert_eq!(track.len(), 100);
        assert_eq!(codec.opens(Path::new("a.flac")), 2);
        Ok(())
    }

    #[test]
    fn test_load_unknown_path_fails() {
        assert!(Track::load("nope.flac", None, codec()).is_err());
    }
}
