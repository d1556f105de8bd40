//! Single-source mixer with pause and volume.
//!
//! The output pump locks the mixer once per block and calls [`Mixer::fill`];
//! control code locks it to swap the source, pause or change volume. The
//! lock is never held across decoding: sources hand out already buffered
//! frames.

use crate::buffer::BufferedStream;
use crate::source::{Frame, SampleSource};
use log::trace;
use std::sync::Arc;

/// Anything the mixer can pull frames from.
///
/// Same contract as [`SampleSource::stream`]: `(filled, ok)` where `ok ==
/// false` means the stream has ended.
pub trait Streamer: Send {
    fn stream(&mut self, buf: &mut [Frame]) -> (usize, bool);
}

impl Streamer for Arc<BufferedStream> {
    fn stream(&mut self, buf: &mut [Frame]) -> (usize, bool) {
        BufferedStream::stream(self, buf)
    }
}

impl Streamer for Box<dyn SampleSource> {
    fn stream(&mut self, buf: &mut [Frame]) -> (usize, bool) {
        (**self).stream(buf)
    }
}

/// Called once when the installed source runs dry.
pub type FinishCallback = Box<dyn FnOnce() + Send>;

/// Logarithmic gain stage: `base ^ level`, or silence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volume {
    pub base: f32,
    pub level: f32,
    pub silent: bool,
}

impl Default for Volume {
    fn default() -> Self {
        Self {
            base: 2.0,
            level: 0.0,
            silent: false,
        }
    }
}

impl Volume {
    #[must_use]
    pub fn gain(&self) -> f32 {
        if self.silent {
            0.0
        } else {
            self.base.powf(self.level)
        }
    }
}

/// Holds at most one playing source.
pub struct Mixer {
    sample_rate: u32,
    source: Option<Box<dyn Streamer>>,
    on_finish: Option<FinishCallback>,
    paused: bool,
    volume: Volume,
}

impl Mixer {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            source: None,
            on_finish: None,
            paused: false,
            volume: Volume::default(),
        }
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Replace whatever is playing with `source`. The previous source's finish
    /// callback is dropped without firing.
    pub fn play(&mut self, source: Box<dyn Streamer>, on_finish: FinishCallback) {
        self.source = Some(source);
        self.on_finish = Some(on_finish);
        self.paused = false;
    }

    /// Remove the current source and its callback.
    pub fn clear(&mut self) {
        self.source = None;
        self.on_finish = None;
    }

    #[must_use]
    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[must_use]
    pub fn volume(&self) -> Volume {
        self.volume
    }

    pub fn set_level(&mut self, level: f32) {
        self.volume.level = level;
    }

    pub fn set_silent(&mut self, silent: bool) {
        self.volume.silent = silent;
    }

    /// Render one block into `out`.
    ///
    /// Gaps (paused, no source, underrun) are silence. When the source ends it
    /// is removed and its finish callback returned; the caller must invoke it
    /// after releasing the mixer lock.
    #[must_use]
    pub fn fill(&mut self, out: &mut [Frame]) -> Option<FinishCallback> {
        out.fill([0.0; 2]);
        if self.paused {
            return None;
        }
        let source = self.source.as_mut()?;

        let (filled, ok) = source.stream(out);
        let gain = self.volume.gain();
        for frame in &mut out[..filled] {
            frame[0] *= gain;
            frame[1] *= gain;
        }

        if ok {
            return None;
        }
        trace!("Mixer source drained");
        self.source = None;
        self.on_finish.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn constant(frames: usize) -> Box<dyn Streamer> {
        let source: Box<dyn SampleSource> =
            Box::new(MemorySource::new(vec![[0.5, -0.5]; frames]));
        Box::new(source)
    }

    fn counting(counter: &Arc<AtomicUsize>) -> FinishCallback {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_volume_gain_mapping() {
        let mut volume = Volume::default();
        assert_abs_diff_eq!(volume.gain(), 1.0);

        volume.level = 1.0;
        assert_abs_diff_eq!(volume.gain(), 2.0);
        volume.level = -1.0;
        assert_abs_diff_eq!(volume.gain(), 0.5);

        volume.silent = true;
        assert_eq!(volume.gain(), 0.0);
    }

    #[test]
    fn test_fill_applies_gain_and_pads_silence() {
        let mut mixer = Mixer::new(44_100);
        let finished = Arc::new(AtomicUsize::new(0));
        mixer.play(constant(3), counting(&finished));
        mixer.set_level(1.0);

        let mut out = [[9.0; 2]; 4];
        assert!(mixer.fill(&mut out).is_none());
        assert_eq!(out[0], [1.0, -1.0]);
        assert_eq!(out[3], [0.0, 0.0]);
    }

    #[test]
    fn test_finish_callback_fires_once() {
        let mut mixer = Mixer::new(44_100);
        let finished = Arc::new(AtomicUsize::new(0));
        mixer.play(constant(2), counting(&finished));

        let mut out = [[0.0; 2]; 4];
        let mut callbacks = 0;
        for _ in 0..4 {
            if let Some(callback) = mixer.fill(&mut out) {
                callback();
                callbacks += 1;
            }
        }

        assert_eq!(callbacks, 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!mixer.has_source());
    }

    #[test]
    fn test_paused_mixer_holds_position() {
        let mut mixer = Mixer::new(44_100);
        mixer.play(constant(2), Box::new(|| {}));
        mixer.set_paused(true);

        let mut out = [[0.0; 2]; 8];
        for _ in 0..3 {
            assert!(mixer.fill(&mut out).is_none());
        }
        assert!(out.iter().all(|f| *f == [0.0, 0.0]));

        mixer.set_paused(false);
        assert!(mixer.fill(&mut out).is_none());
        assert_eq!(out[0], [0.5, -0.5]);
    }

    #[test]
    fn test_replacing_source_drops_old_callback() {
        let mut mixer = Mixer::new(44_100);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        mixer.play(constant(1), counting(&first));
        mixer.play(constant(1), counting(&second));

        let mut out = [[0.0; 2]; 4];
        // 1 frame, ok; then drained.
        assert!(mixer.fill(&mut out).is_none());
        if let Some(callback) = mixer.fill(&mut out) {
            callback();
        }

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
