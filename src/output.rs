//! # Audio Output
//!
//! Process-scoped output device. Created once in `main`, kept alive for the
//! whole run, and shared with the player through a cloneable
//! [`OutputHandle`].
//!
//! ## Threads
//!
//! - **Pump**: locks the [`Mixer`] once per block, renders into a fresh
//!   buffer, releases the lock and pushes the block into a bounded channel.
//!   Blocking on that channel is what paces it to the device.
//! - **Device callback** (owned by cpal): drains blocks with `try_recv` and
//!   never locks anything. An empty channel plays silence.
//!
//! [`AudioOutput::detached`] builds the same mixer with no device or pump;
//! callers render blocks themselves. Tests and `--dry-run` use it.

use crate::error::{PlayerError, Result};
use crate::mixer::Mixer;
use crate::source::{Format, Frame};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Blocks queued between the pump and the device callback.
const QUEUED_BLOCKS: usize = 2;

/// Shared access to the mixer feeding the output.
///
/// Locking it is the structural lock: a source swapped while holding it is
/// seen atomically by the pump.
#[derive(Clone)]
pub struct OutputHandle {
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
}

impl OutputHandle {
    fn new(sample_rate: u32) -> Self {
        Self {
            mixer: Arc::new(Mutex::new(Mixer::new(sample_rate))),
            sample_rate,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock()
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Render one block and fire the finish callback, if any, after the lock
    /// is released.
    pub fn render_into(&self, block: &mut [Frame]) {
        let finished = self.lock().fill(block);
        if let Some(callback) = finished {
            callback();
        }
    }
}

struct Device {
    stream: cpal::Stream,
    running: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

/// The output device, or a detached stand-in.
pub struct AudioOutput {
    handle: OutputHandle,
    block_frames: usize,
    device: Option<Device>,
}

impl AudioOutput {
    /// Open the default output device at `sample_rate`, pulling blocks of
    /// `block` length from the mixer.
    ///
    /// # Errors
    ///
    /// Returns [`PlayerError::Output`] if there is no output device, the
    /// device rejects the configuration, or the stream cannot start.
    pub fn open(sample_rate: u32, block: Duration) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::Output("no output device available".to_string()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| PlayerError::Output(e.to_string()))?;

        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        info!(
            "Opening output '{}' at {sample_rate} Hz, {} ch, {:?}",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.channels,
            supported.sample_format()
        );

        let handle = OutputHandle::new(sample_rate);
        let block_frames = Format::new(sample_rate, 2).frames_for(block).max(1);
        let (sender, receiver) = crossbeam_channel::bounded(QUEUED_BLOCKS);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, receiver),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, receiver),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, receiver),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, receiver),
            SampleFormat::F64 => build_stream::<f64>(&device, &config, receiver),
            format => {
                return Err(PlayerError::Output(format!(
                    "unsupported sample format {format:?}"
                )))
            }
        }?;
        stream
            .play()
            .map_err(|e| PlayerError::Output(e.to_string()))?;

        let running = Arc::new(AtomicBool::new(true));
        let pump = {
            let handle = handle.clone();
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("output-pump".to_string())
                .spawn(move || pump(&handle, &sender, &running, block_frames))?
        };

        Ok(Self {
            handle,
            block_frames,
            device: Some(Device {
                stream,
                running,
                pump: Some(pump),
            }),
        })
    }

    /// A mixer at `sample_rate` with no device behind it.
    #[must_use]
    pub fn detached(sample_rate: u32, block: Duration) -> Self {
        debug!("Using detached output at {sample_rate} Hz");
        Self {
            handle: OutputHandle::new(sample_rate),
            block_frames: Format::new(sample_rate, 2).frames_for(block).max(1),
            device: None,
        }
    }

    #[must_use]
    pub fn handle(&self) -> OutputHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.handle.sample_rate
    }

    #[must_use]
    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.device.is_none()
    }

    /// Pull one block from the mixer by hand. Only meaningful when detached;
    /// with a device the pump is already doing this.
    pub fn render(&self) -> Vec<Frame> {
        let mut block = vec![[0.0; 2]; self.block_frames];
        self.handle.render_into(&mut block);
        block
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.running.store(false, Ordering::Release);
            if let Err(e) = device.stream.pause() {
                debug!("Pausing output stream failed: {e}");
            }
            // Dropping the stream drops the receiver and unblocks the pump.
            drop(device.stream);
            if let Some(pump) = device.pump.take() {
                if pump.join().is_err() {
                    warn!("Output pump panicked");
                }
            }
            debug!("Output closed");
        }
    }
}

fn pump(handle: &OutputHandle, sender: &Sender<Vec<Frame>>, running: &AtomicBool, frames: usize) {
    while running.load(Ordering::Acquire) {
        let mut block = vec![[0.0; 2]; frames];
        handle.render_into(&mut block);
        if sender.send(block).is_err() {
            break;
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    blocks: Receiver<Vec<Frame>>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels).max(1);
    let mut current: Vec<Frame> = Vec::new();
    let mut offset = 0;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for out in data.chunks_mut(channels) {
                    if offset >= current.len() {
                        if let Ok(block) = blocks.try_recv() {
                            current = block;
                            offset = 0;
                        }
                    }
                    let [left, right] = current.get(offset).copied().unwrap_or([0.0; 2]);
                    offset += 1;
                    write_frame(out, left, right);
                }
            },
            |e| error!("Output stream error: {e}"),
            None,
        )
        .map_err(|e| PlayerError::Output(e.to_string()))
}

fn write_frame<T: SizedSample + FromSample<f32>>(out: &mut [T], left: f32, right: f32) {
    match out {
        [mono] => *mono = T::from_sample((left + right) * 0.5),
        [l, r, rest @ ..] => {
            *l = T::from_sample(left);
            *r = T::from_sample(right);
            for sample in rest {
                *sample = T::from_sample(0.0);
            }
        }
        [] => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::Streamer;
    use crate::source::{MemorySource, SampleSource};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_detached_render_pulls_from_mixer() {
        let output = AudioOutput::detached(1000, Duration::from_millis(10));
        assert_eq!(output.block_frames(), 10);
        assert!(output.is_detached());

        let source: Box<dyn SampleSource> = Box::new(MemorySource::new(vec![[0.5, 0.5]; 15]));
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        output.handle().lock().play(
            Box::new(source) as Box<dyn Streamer>,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(output.render().iter().all(|f| *f == [0.5, 0.5]));
        let second = output.render();
        assert_eq!(second[4], [0.5, 0.5]);
        assert_eq!(second[5], [0.0, 0.0]);

        output.render();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_write_frame_layouts() {
        let mut mono = [0.0_f32; 1];
        write_frame(&mut mono, 1.0, 0.0);
        assert_eq!(mono, [0.5]);

        let mut surround = [9.0_f32; 4];
        write_frame(&mut surround, 0.25, -0.25);
        assert_eq!(surround, [0.25, -0.25, 0.0, 0.0]);
    }
}
