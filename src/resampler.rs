//! Streaming sample-rate conversion using rubato.
//!
//! [`Resampled`] wraps any [`Streamer`] running at the track's native rate and
//! presents it at the output rate. Input is pulled in the fixed chunk size
//! rubato asks for; a short final chunk is flushed with `process_partial` and
//! trimmed to the expected length.

use crate::error::{PlayerError, Result};
use crate::mixer::Streamer;
use crate::source::Frame;
use log::{debug, warn};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Input frames handed to rubato per call.
pub const RESAMPLE_CHUNK: usize = 1024;

enum Refill {
    Ready,
    Starved,
    Ended,
}

/// A [`Streamer`] converted from `from` Hz to `to` Hz.
pub struct Resampled<S> {
    inner: S,
    resampler: FastFixedIn<f32>,
    ratio: f64,
    pending: Vec<Frame>,
    have: usize,
    output: Vec<Frame>,
    offset: usize,
    finished: bool,
}

impl<S: Streamer> Resampled<S> {
    /// # Errors
    ///
    /// Returns [`PlayerError::Resample`] if rubato rejects the rate pair.
    pub fn new(inner: S, from: u32, to: u32) -> Result<Self> {
        let ratio = f64::from(to) / f64::from(from);
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Septic,
            RESAMPLE_CHUNK,
            2,
        )
        .map_err(|e| PlayerError::Resample(format!("{from} Hz -> {to} Hz: {e}")))?;
        debug!("Resampling {from} Hz -> {to} Hz");

        Ok(Self {
            inner,
            resampler,
            ratio,
            pending: vec![[0.0; 2]; RESAMPLE_CHUNK],
            have: 0,
            output: Vec::new(),
            offset: 0,
            finished: false,
        })
    }

    /// Pull one input chunk from `inner` and convert it.
    fn refill(&mut self) -> Refill {
        let needed = self.resampler.input_frames_next();
        if self.pending.len() < needed {
            self.pending.resize(needed, [0.0; 2]);
        }

        while self.have < needed {
            let (filled, ok) = self.inner.stream(&mut self.pending[self.have..needed]);
            self.have += filled;
            if !ok {
                self.finished = true;
                self.flush();
                return Refill::Ended;
            }
            if filled == 0 {
                return Refill::Starved;
            }
        }

        let planar = deinterleave(&self.pending[..needed]);
        self.have = 0;
        match self.resampler.process(&planar, None) {
            Ok(out) => {
                self.output = interleave(&out);
                self.offset = 0;
                Refill::Ready
            }
            Err(e) => {
                warn!("Resampler failed, ending stream: {e}");
                self.finished = true;
                Refill::Ended
            }
        }
    }

    /// Convert the short tail left in `pending`.
    fn flush(&mut self) {
        if self.have == 0 {
            self.output.clear();
            self.offset = 0;
            return;
        }
        let planar = deinterleave(&self.pending[..self.have]);
        let expected = (self.have as f64 * self.ratio).ceil() as usize;
        self.have = 0;
        match self.resampler.process_partial(Some(planar.as_slice()), None) {
            Ok(out) => {
                self.output = interleave(&out);
                self.output.truncate(expected);
            }
            Err(e) => {
                warn!("Resampler flush failed: {e}");
                self.output.clear();
            }
        }
        self.offset = 0;
    }
}

impl<S: Streamer> Streamer for Resampled<S> {
    fn stream(&mut self, buf: &mut [Frame]) -> (usize, bool) {
        let mut filled = 0;
        while filled < buf.len() {
            if self.offset < self.output.len() {
                let available = &self.output[self.offset..];
                let n = available.len().min(buf.len() - filled);
                buf[filled..filled + n].copy_from_slice(&available[..n]);
                self.offset += n;
                filled += n;
                continue;
            }
            if self.finished {
                return (filled, filled > 0);
            }
            match self.refill() {
                Refill::Ready | Refill::Ended => {}
                Refill::Starved => return (filled, true),
            }
        }
        (filled, true)
    }
}

/// `[[L, R], ...]` to `[[L, ...], [R, ...]]`.
fn deinterleave(frames: &[Frame]) -> Vec<Vec<f32>> {
    let left = frames.iter().map(|f| f[0]).collect();
    let right = frames.iter().map(|f| f[1]).collect();
    vec![left, right]
}

fn interleave(planar: &[Vec<f32>]) -> Vec<Frame> {
    match planar {
        [left, right, ..] => left.iter().zip(right).map(|(l, r)| [*l, *r]).collect(),
        [mono] => mono.iter().map(|s| [*s, *s]).collect(),
        [] => Vec::new(),
    }
}
