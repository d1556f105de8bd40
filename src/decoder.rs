//! Streaming audio decoder using symphonia.
//!
//! Decodes packet by packet on demand instead of loading whole files, so a
//! track costs one file handle and a packet's worth of memory. Everything is
//! down-mixed (or up-mixed) to stereo `f32` frames at the file's native rate;
//! rate conversion happens later in the playback chain.

use crate::error::{PlayerError, Result};
use crate::source::{CodecAdapter, Format, Frame, SampleSource};
use log::{debug, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

// Decode errors on single packets are not fatal; more than this many in a row is.
const MAX_DECODE_RETRIES: usize = 3;

/// [`CodecAdapter`] backed by symphonia's default format and codec registries.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaCodec;

impl CodecAdapter for SymphoniaCodec {
    fn open(&self, path: &Path) -> Result<(Box<dyn SampleSource>, Format)> {
        let source = SymphoniaSource::open(path)?;
        let format = source.format;
        let source: Box<dyn SampleSource> = Box::new(source);
        Ok((source, format))
    }
}

// Interleaving buffer, reused while packets keep the same shape.
struct Scratch {
    buf: SampleBuffer<f32>,
    spec: SignalSpec,
    frames: usize,
}

/// One open audio file.
pub struct SymphoniaSource {
    path: PathBuf,
    reader: Option<Box<dyn FormatReader>>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: Format,
    time_base: Option<TimeBase>,
    total_frames: u64,
    scratch: Option<Scratch>,
    pending: Vec<Frame>,
    pending_pos: usize,
    position: u64,
    error: Option<String>,
}

impl SymphoniaSource {
    /// Probe and open `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PlayerError::Decode`] if the file cannot be opened, has no
    /// decodable audio track, or lacks a sample rate.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PlayerError::decode(path, e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PlayerError::decode(path, format!("probe failed: {e}")))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PlayerError::decode(path, "no audio track found"))?;

        let params = &track.codec_params;
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| PlayerError::decode(path, "sample rate not found"))?;
        let channels = params.channels.map_or(2, |c| c.count() as u16);
        let total_frames = params.n_frames.unwrap_or(0);
        let time_base = params.time_base;
        let track_id = track.id;

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| PlayerError::decode(path, format!("no decoder: {e}")))?;

        debug!(
            "Decoding {}: {sample_rate} Hz, {channels} ch, {total_frames} frames",
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(reader),
            decoder,
            track_id,
            format: Format::new(sample_rate, channels),
            time_base,
            total_frames,
            scratch: None,
            pending: Vec::new(),
            pending_pos: 0,
            position: 0,
            error: None,
        })
    }

    #[must_use]
    pub fn format(&self) -> Format {
        self.format
    }

    /// Decode the next packet of our track into `pending`.
    /// Returns `false` at end of stream or on a fatal error.
    fn decode_next(&mut self) -> bool {
        let Some(reader) = self.reader.as_mut() else {
            return false;
        };

        let mut failures = 0;
        loop {
            let packet = match reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return false;
                }
                Err(SymphoniaError::ResetRequired) => {
                    debug!("{}: stream reset required, ending", self.path.display());
                    return false;
                }
                Err(e) => {
                    self.error = Some(e.to_string());
                    return false;
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    Self::append_frames(&mut self.scratch, &mut self.pending, decoded);
                    self.pending_pos = 0;
                    return true;
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    failures += 1;
                    warn!("{}: decode error: {e}", self.path.display());
                    if failures > MAX_DECODE_RETRIES {
                        self.error = Some(e.to_string());
                        return false;
                    }
                }
                Err(e) => {
                    self.error = Some(e.to_string());
                    return false;
                }
            }
        }
    }

    /// Interleave `decoded` into stereo frames, replacing `pending`.
    fn append_frames(
        scratch: &mut Option<Scratch>,
        pending: &mut Vec<Frame>,
        decoded: AudioBufferRef<'_>,
    ) {
        let spec = *decoded.spec();
        let frames = decoded.capacity();
        let reusable = scratch
            .as_ref()
            .is_some_and(|s| s.spec == spec && s.frames >= frames);
        if !reusable {
            *scratch = Some(Scratch {
                buf: SampleBuffer::new(frames as u64, spec),
                spec,
                frames,
            });
        }
        let Some(Scratch { buf, .. }) = scratch.as_mut() else {
            return;
        };
        buf.copy_interleaved_ref(decoded);

        let channels = spec.channels.count().max(1);
        pending.clear();
        pending.extend(buf.samples().chunks_exact(channels).map(|frame| {
            if channels == 1 {
                [frame[0], frame[0]]
            } else {
                [frame[0], frame[1]]
            }
        }));
    }

    fn ts_to_frames(&self, ts: u64) -> u64 {
        match self.time_base {
            Some(base) => {
                let time = base.calc_time(ts);
                let rate = u64::from(self.format.sample_rate);
                time.seconds * rate + (time.frac * rate as f64) as u64
            }
            None => ts,
        }
    }
}

impl SampleSource for SymphoniaSource {
    fn stream(&mut self, buf: &mut [Frame]) -> (usize, bool) {
        let mut filled = 0;
        while filled < buf.len() {
            if self.pending_pos >= self.pending.len() && !self.decode_next() {
                break;
            }
            let available = &self.pending[self.pending_pos..];
            let n = available.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&available[..n]);
            self.pending_pos += n;
            filled += n;
        }
        self.position += filled as u64;
        (filled, filled > 0)
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        if self.total_frames > 0 && position > self.total_frames {
            return Err(PlayerError::Seek(format!(
                "{}: frame {position} is past the end ({} frames)",
                self.path.display(),
                self.total_frames
            )));
        }
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| PlayerError::Seek("source is closed".to_string()))?;

        let seconds = position as f64 / f64::from(self.format.sample_rate);
        let seeked = reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(seconds),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| PlayerError::Seek(e.to_string()))?;

        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.position = self.ts_to_frames(seeked.actual_ts);

        // Coarse seeks land on a packet boundary; decode forward to the frame.
        let mut skip = position.saturating_sub(self.position);
        while skip > 0 {
            if self.pending_pos >= self.pending.len() && !self.decode_next() {
                break;
            }
            let n = ((self.pending.len() - self.pending_pos) as u64).min(skip);
            self.pending_pos += n as usize;
            self.position += n;
            skip -= n;
        }
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn len(&self) -> u64 {
        self.total_frames
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            self.pending.clear();
            self.pending_pos = 0;
            debug!("Released {}", self.path.display());
        }
    }

    fn err(&self) -> Option<String> {
        self.error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file_is_decode_error() {
        let result = SymphoniaCodec.open(Path::new("/no/such/track.flac"));
        assert!(matches!(result, Err(PlayerError::Decode { .. })));
    }

    #[test]
    fn test_open_garbage_file_is_decode_error() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("noise.mp3");
        std::fs::write(&path, b"definitely not audio")?;

        assert!(SymphoniaSource::open(&path).is_err());
        Ok(())
    }
}
