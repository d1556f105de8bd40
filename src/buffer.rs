//! # Buffered Stream Pipeline
//!
//! Decoding happens on a background fill thread that keeps up to `depth`
//! fixed-size chunks queued ahead of the reader. The reader (the output pump)
//! only ever touches the FIFO and its own leftover chunk, so disk and decoder
//! latency never reach the audio callback.
//!
//! ## Lifecycle
//!
//! - One fill thread per [`BufferedStream`], started on construction.
//! - [`seek`](BufferedStream::seek) cancels and joins the fill thread, seeks
//!   the source, drops everything buffered and starts a new fill thread, even
//!   when the seek itself failed.
//! - [`close`](BufferedStream::close) cancels and joins once; later calls do
//!   nothing.
//!
//! Cancellation is a zero-capacity channel whose sender is dropped: the fill
//! thread sees the disconnect both between decodes and while blocked on a
//! full FIFO.
//!
//! ## Generations
//!
//! The FIFO lives as long as the stream. Every fill thread tags what it sends
//! with a generation number, bumped on each seek, so the reader can tell stale
//! chunks from fresh ones without taking the structural lock.

use crate::error::{PlayerError, Result};
use crate::source::{Format, Frame, SampleSource};
use crate::track::SourceHandle;
use crossbeam_channel::{select, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Frames per chunk.
pub const CHUNK_FRAMES: usize = 4096;

/// Read-ahead used when none is configured.
pub const DEFAULT_LOOKAHEAD: Duration = Duration::from_secs(2);

/// Longest a read waits on an empty FIFO before reporting an underrun.
const STARVATION_TIMEOUT: Duration = Duration::from_millis(50);

enum Message {
    Chunk { generation: u64, frames: Vec<Frame> },
    End { generation: u64 },
}

#[derive(Default)]
struct FillControl {
    cancel: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

struct ReadState {
    generation: u64,
    leftover: Vec<Frame>,
    offset: usize,
    finished: bool,
}

impl ReadState {
    fn reset(&mut self, generation: u64) {
        self.generation = generation;
        self.leftover.clear();
        self.offset = 0;
        self.finished = false;
    }
}

/// Read-ahead wrapper around a decoded source.
pub struct BufferedStream {
    source: SourceHandle,
    len: u64,
    chunk_frames: usize,
    depth: usize,
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    generation: AtomicU64,
    position: AtomicU64,
    closed: AtomicBool,
    control: Mutex<FillControl>,
    reader: Mutex<ReadState>,
}

impl BufferedStream {
    /// Buffer `lookahead` worth of `source` in [`CHUNK_FRAMES`] chunks.
    ///
    /// # Errors
    ///
    /// Returns [`PlayerError::Io`] if the fill thread cannot be spawned.
    pub fn new(source: SourceHandle, format: Format, lookahead: Duration) -> Result<Self> {
        Self::with_chunk_frames(source, format, lookahead, CHUNK_FRAMES)
    }

    /// Like [`new`](Self::new) with an explicit chunk size.
    ///
    /// # Errors
    ///
    /// Returns [`PlayerError::Io`] if the fill thread cannot be spawned.
    pub fn with_chunk_frames(
        source: SourceHandle,
        format: Format,
        lookahead: Duration,
        chunk_frames: usize,
    ) -> Result<Self> {
        let chunk_frames = chunk_frames.max(1);
        let depth = (format.frames_for(lookahead) / chunk_frames).max(1);
        let (sender, receiver) = crossbeam_channel::bounded(depth);
        let (len, start) = {
            let source = source.lock();
            (source.len(), source.position())
        };

        let stream = Self {
            source,
            len,
            chunk_frames,
            depth,
            sender,
            receiver,
            generation: AtomicU64::new(0),
            position: AtomicU64::new(start),
            closed: AtomicBool::new(false),
            control: Mutex::new(FillControl::default()),
            reader: Mutex::new(ReadState {
                generation: 0,
                leftover: Vec::new(),
                offset: 0,
                finished: false,
            }),
        };
        {
            let mut control = stream.control.lock();
            stream.spawn_fill(&mut control)?;
        }
        debug!(
            "Buffering {} chunks of {chunk_frames} frames ({:?} at {} Hz)",
            depth, lookahead, format.sample_rate
        );
        Ok(stream)
    }

    /// Maximum number of chunks queued ahead of the reader.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    /// Chunks currently waiting in the FIFO.
    #[must_use]
    pub fn buffered_chunks(&self) -> usize {
        self.receiver.len()
    }

    /// Fill `buf` from the buffered chunks.
    ///
    /// Returns `(filled, filled > 0)` once the source has ended. If the FIFO
    /// runs dry before that, returns what it has with `ok == true` so the
    /// caller can pad the gap.
    pub fn stream(&self, buf: &mut [Frame]) -> (usize, bool) {
        if self.closed.load(Ordering::Acquire) {
            return (0, false);
        }

        let mut reader = self.reader.lock();
        let generation = self.generation.load(Ordering::Acquire);
        if reader.generation != generation {
            reader.reset(generation);
        }

        let mut filled = 0;
        let mut starved = false;
        while filled < buf.len() {
            if reader.offset < reader.leftover.len() {
                let available = &reader.leftover[reader.offset..];
                let n = available.len().min(buf.len() - filled);
                buf[filled..filled + n].copy_from_slice(&available[..n]);
                reader.offset += n;
                filled += n;
                continue;
            }
            if reader.finished {
                break;
            }

            let received = self.receiver.recv_timeout(STARVATION_TIMEOUT);
            if self.discard_if_seeked(&mut reader) {
                filled = 0;
            }
            match received {
                Ok(Message::Chunk { generation, frames }) => {
                    if generation < reader.generation {
                        continue;
                    }
                    if generation > reader.generation {
                        reader.reset(generation);
                    }
                    reader.leftover = frames;
                    reader.offset = 0;
                }
                Ok(Message::End { generation }) => {
                    if generation >= reader.generation {
                        reader.generation = generation;
                        reader.finished = true;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    starved = !self.closed.load(Ordering::Acquire);
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    reader.finished = true;
                }
            }
        }

        if self.discard_if_seeked(&mut reader) {
            return (0, true);
        }
        self.position.fetch_add(filled as u64, Ordering::AcqRel);
        if starved {
            trace!("Buffer underrun after {filled} frames");
            (filled, true)
        } else {
            (filled, filled > 0)
        }
    }

    /// Seek the underlying source to frame `position` and restart buffering.
    ///
    /// # Errors
    ///
    /// Returns the source's seek error (buffering restarts regardless), or
    /// [`PlayerError::Seek`] if the stream is closed.
    pub fn seek(&self, position: u64) -> Result<()> {
        let mut control = self.control.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(PlayerError::Seek("stream is closed".to_string()));
        }

        Self::stop_fill(&mut control);
        while self.receiver.try_recv().is_ok() {}
        self.generation.fetch_add(1, Ordering::AcqRel);
        // A read in flight finishes counting before the target is stored.
        let _reader = self.reader.lock();

        let result = {
            let mut source = self.source.lock();
            let result = source.seek(position);
            let landed = if result.is_ok() {
                position
            } else {
                source.position()
            };
            self.position.store(landed, Ordering::Release);
            result
        };
        if let Err(e) = &result {
            warn!("Seek to frame {position} failed: {e}");
        }

        self.spawn_fill(&mut control)?;
        result
    }

    /// Stop buffering. Idempotent.
    pub fn close(&self) {
        let mut control = self.control.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        Self::stop_fill(&mut control);
        while self.receiver.try_recv().is_ok() {}
        trace!("Closed buffered stream");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Frames delivered since construction, or the target of the last seek
    /// plus frames delivered since.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    /// Total frames of the underlying source.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Terminal error of the underlying source.
    #[must_use]
    pub fn err(&self) -> Option<String> {
        self.source.lock().err()
    }

    /// Reset `reader` if a seek bumped the generation during the current
    /// read. Whatever was gathered before that point predates the seek.
    fn discard_if_seeked(&self, reader: &mut ReadState) -> bool {
        let latest = self.generation.load(Ordering::Acquire);
        if latest == reader.generation {
            return false;
        }
        trace!("Dropping frames of generation {} after seek", reader.generation);
        reader.reset(latest);
        true
    }

    fn spawn_fill(&self, control: &mut FillControl) -> Result<()> {
        let (cancel, cancelled) = crossbeam_channel::bounded::<()>(0);
        let generation = self.generation.load(Ordering::Acquire);
        let source = Arc::clone(&self.source);
        let sender = self.sender.clone();
        let chunk_frames = self.chunk_frames;

        let worker = thread::Builder::new()
            .name(format!("fill-{generation}"))
            .spawn(move || fill(&source, &sender, &cancelled, generation, chunk_frames))?;

        control.cancel = Some(cancel);
        control.worker = Some(worker);
        Ok(())
    }

    fn stop_fill(control: &mut FillControl) {
        drop(control.cancel.take());
        if let Some(worker) = control.worker.take() {
            if worker.join().is_err() {
                warn!("Fill thread panicked");
            }
        }
    }
}

impl SampleSource for BufferedStream {
    fn stream(&mut self, buf: &mut [Frame]) -> (usize, bool) {
        BufferedStream::stream(self, buf)
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        BufferedStream::seek(self, position)
    }

    fn position(&self) -> u64 {
        BufferedStream::position(self)
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn close(&mut self) {
        BufferedStream::close(self);
    }

    fn err(&self) -> Option<String> {
        BufferedStream::err(self)
    }
}

impl Drop for BufferedStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Body of the fill thread.
fn fill(
    source: &SourceHandle,
    sender: &Sender<Message>,
    cancelled: &Receiver<()>,
    generation: u64,
    chunk_frames: usize,
) {
    loop {
        if !matches!(cancelled.try_recv(), Err(TryRecvError::Empty)) {
            trace!("Fill thread {generation} cancelled");
            return;
        }

        let mut frames = vec![[0.0; 2]; chunk_frames];
        let (filled, ok) = source.lock().stream(&mut frames);

        if filled > 0 {
            frames.truncate(filled);
            if !deliver(sender, cancelled, Message::Chunk { generation, frames }) {
                return;
            }
        }
        if !ok {
            deliver(sender, cancelled, Message::End { generation });
            trace!("Fill thread {generation} reached end of stream");
            return;
        }
    }
}

/// Blocking send that gives up as soon as cancellation is signalled.
fn deliver(sender: &Sender<Message>, cancelled: &Receiver<()>, message: Message) -> bool {
    select! {
        send(sender, message) -> sent => sent.is_ok(),
        recv(cancelled) -> _ => false,
    }
}
