//! cpal-backed playback
//!
//! Implements [`PlaybackBackend`] on top of cpal's callback model:
//!
//! - Each source owns a dedicated stream thread (the cpal `Stream` is not
//!   `Send`, so the thread that builds it keeps it until shutdown).
//! - Queued buffer PCM is converted to the stream's layout up front and
//!   pushed into a lock-free SPSC ring; the real-time callback only pops,
//!   scales and writes. No locks and no allocation on the audio thread.
//! - A queued buffer counts as processed once the callback has consumed
//!   every frame it contributed to the ring.
//!
//! Pitch is applied during the queue-time conversion. That is only
//! correct because the engine never retunes a live source; a pitch
//! change takes effect from the next queued buffer.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};

use sf_core::{Position3D, Sample};

use crate::{AudioError, AudioResult, BufferId, PlaybackBackend, SourceId, SourceState};

/// SPSC ring capacity in samples (~2.7 s of stereo audio at 48 kHz).
/// Queueing more than this un-reclaimed is a caller accounting bug.
const RING_CAPACITY: usize = 1 << 18;

/// How often the stream-owner thread checks for shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(25);

// ═══════════════════════════════════════════════════════════════════════════
// SHARED STATE (control side <-> audio callback)
// ═══════════════════════════════════════════════════════════════════════════

struct SourceShared {
    /// Callback consumes from the ring only while set.
    playing: AtomicBool,
    /// One-shot request for the callback to drain and discard the ring.
    discard: AtomicBool,
    /// Stream-owner thread exits when set.
    shutdown: AtomicBool,
    /// Linear gain (f32 bits).
    gain: AtomicU32,
    /// Pan position, -1 (left) to 1 (right) (f32 bits).
    pan: AtomicU32,
    /// Stream frames consumed by the callback so far.
    frames_consumed: AtomicU64,
}

impl SourceShared {
    fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            discard: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            gain: AtomicU32::new(1.0f32.to_bits()),
            pan: AtomicU32::new(0.0f32.to_bits()),
            frames_consumed: AtomicU64::new(0),
        }
    }
}

struct QueuedEntry {
    buffer: BufferId,
    /// Stream frames this buffer contributed to the ring.
    frames: u64,
}

struct CpalSource {
    shared: Arc<SourceShared>,
    producer: Producer<f32>,
    queue: VecDeque<QueuedEntry>,
    /// Stream frames pushed over the source's lifetime.
    queued_frames_total: u64,
    /// Stream frames belonging to entries already unqueued.
    reclaimed_frames: u64,
    thread: Option<thread::JoinHandle<()>>,
    pitch: f32,
    started: bool,
    stopped: bool,
    stream_rate: u32,
    stream_channels: u16,
}

struct PcmBuffer {
    pcm: Vec<Sample>,
    channels: u16,
    sample_rate: u32,
}

#[derive(Default)]
struct CpalState {
    next_id: u32,
    sources: HashMap<u32, CpalSource>,
    buffers: HashMap<u32, PcmBuffer>,
}

/// Playback backend over the default cpal output device.
#[derive(Default)]
pub struct CpalBackend {
    state: Mutex<CpalState>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn unknown_source() -> AudioError {
    AudioError::BackendCall("unknown source id".into())
}

fn unknown_buffer() -> AudioError {
    AudioError::BackendCall("unknown buffer id".into())
}

impl PlaybackBackend for CpalBackend {
    fn create_source(&self) -> AudioResult<SourceId> {
        let shared = Arc::new(SourceShared::new());
        let (producer, consumer) = RingBuffer::<f32>::new(RING_CAPACITY);

        let (ready_tx, ready_rx) = mpsc::channel();
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("sf-audio-stream".into())
            .spawn(move || run_source_stream(consumer, thread_shared, ready_tx))
            .map_err(|e| AudioError::BackendCall(format!("failed to spawn stream thread: {e}")))?;

        let (stream_rate, stream_channels) = match ready_rx.recv() {
            Ok(Ok(params)) => params,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(AudioError::BackendUnavailable(
                    "stream thread died during startup".into(),
                ));
            }
        };

        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.sources.insert(
            id,
            CpalSource {
                shared,
                producer,
                queue: VecDeque::new(),
                queued_frames_total: 0,
                reclaimed_frames: 0,
                thread: Some(handle),
                pitch: 1.0,
                started: false,
                stopped: false,
                stream_rate,
                stream_channels,
            },
        );
        Ok(SourceId(id))
    }

    fn destroy_source(&self, source: SourceId) -> AudioResult<()> {
        let removed = self.state.lock().sources.remove(&source.0);
        if let Some(mut src) = removed {
            src.shared.shutdown.store(true, Ordering::Release);
            if let Some(handle) = src.thread.take() {
                let _ = handle.join();
            }
        }
        Ok(())
    }

    fn create_buffers(&self, count: usize) -> AudioResult<Vec<BufferId>> {
        let mut state = self.state.lock();
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            state.next_id += 1;
            let id = state.next_id;
            state.buffers.insert(
                id,
                PcmBuffer {
                    pcm: Vec::new(),
                    channels: 1,
                    sample_rate: 44100,
                },
            );
            ids.push(BufferId(id));
        }
        Ok(ids)
    }

    fn destroy_buffers(&self, buffers: &[BufferId]) -> AudioResult<()> {
        let mut state = self.state.lock();
        for id in buffers {
            state.buffers.remove(&id.0);
        }
        Ok(())
    }

    fn write_buffer(
        &self,
        buffer: BufferId,
        pcm: &[Sample],
        channels: u16,
        sample_rate: u32,
    ) -> AudioResult<()> {
        let mut state = self.state.lock();
        let buf = state.buffers.get_mut(&buffer.0).ok_or_else(unknown_buffer)?;
        buf.pcm.clear();
        buf.pcm.extend_from_slice(pcm);
        buf.channels = channels.max(1);
        buf.sample_rate = sample_rate.max(1);
        Ok(())
    }

    fn queue_buffer(&self, source: SourceId, buffer: BufferId) -> AudioResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let buf = state.buffers.get(&buffer.0).ok_or_else(unknown_buffer)?;
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown_source)?;

        let converted = convert_to_stream(
            &buf.pcm,
            buf.channels,
            buf.sample_rate,
            src.pitch,
            src.stream_channels,
            src.stream_rate,
        );

        if src.producer.slots() < converted.len() {
            return Err(AudioError::BackendCall("playback ring full".into()));
        }
        for sample in &converted {
            let _ = src.producer.push(*sample);
        }

        let frames = (converted.len() / src.stream_channels as usize) as u64;
        src.queue.push_back(QueuedEntry { buffer, frames });
        src.queued_frames_total += frames;
        Ok(())
    }

    fn unqueue_buffer(&self, source: SourceId) -> AudioResult<Option<BufferId>> {
        let mut state = self.state.lock();
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown_source)?;
        if processed_entries(src) == 0 {
            return Ok(None);
        }
        let entry = match src.queue.pop_front() {
            Some(entry) => entry,
            None => return Ok(None),
        };
        src.reclaimed_frames += entry.frames;
        Ok(Some(entry.buffer))
    }

    fn queued_count(&self, source: SourceId) -> AudioResult<usize> {
        let state = self.state.lock();
        let src = state.sources.get(&source.0).ok_or_else(unknown_source)?;
        Ok(src.queue.len())
    }

    fn processed_count(&self, source: SourceId) -> AudioResult<usize> {
        let state = self.state.lock();
        let src = state.sources.get(&source.0).ok_or_else(unknown_source)?;
        Ok(processed_entries(src))
    }

    fn play(&self, source: SourceId) -> AudioResult<()> {
        let mut state = self.state.lock();
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown_source)?;
        src.started = true;
        src.stopped = false;
        src.shared.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self, source: SourceId) -> AudioResult<()> {
        let mut state = self.state.lock();
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown_source)?;
        src.stopped = true;
        src.shared.playing.store(false, Ordering::Release);
        Ok(())
    }

    fn rewind(&self, source: SourceId) -> AudioResult<()> {
        let mut state = self.state.lock();
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown_source)?;
        src.shared.playing.store(false, Ordering::Release);
        src.shared.discard.store(true, Ordering::Release);
        src.shared.frames_consumed.store(0, Ordering::Release);
        src.queue.clear();
        src.queued_frames_total = 0;
        src.reclaimed_frames = 0;
        src.started = false;
        src.stopped = false;
        Ok(())
    }

    fn source_state(&self, source: SourceId) -> AudioResult<SourceState> {
        let state = self.state.lock();
        let src = state.sources.get(&source.0).ok_or_else(unknown_source)?;
        if !src.started {
            return Ok(SourceState::Initial);
        }
        if src.stopped {
            return Ok(SourceState::Stopped);
        }
        let consumed = src.shared.frames_consumed.load(Ordering::Acquire);
        if consumed >= src.queued_frames_total {
            // Queue drained; OpenAL-style auto-stop
            Ok(SourceState::Stopped)
        } else {
            Ok(SourceState::Playing)
        }
    }

    fn set_gain(&self, source: SourceId, gain: f32) -> AudioResult<()> {
        let state = self.state.lock();
        let src = state.sources.get(&source.0).ok_or_else(unknown_source)?;
        src.shared
            .gain
            .store(gain.max(0.0).to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn set_pitch(&self, source: SourceId, pitch: f32) -> AudioResult<()> {
        let mut state = self.state.lock();
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown_source)?;
        if pitch > 0.0 {
            src.pitch = pitch;
        }
        Ok(())
    }

    fn set_position(&self, source: SourceId, position: Position3D) -> AudioResult<()> {
        let state = self.state.lock();
        let src = state.sources.get(&source.0).ok_or_else(unknown_source)?;
        let horizontal = (position.x * position.x + position.z * position.z).sqrt();
        let pan = if horizontal < 1e-6 {
            0.0
        } else {
            (position.x / horizontal).clamp(-1.0, 1.0)
        };
        src.shared.pan.store(pan.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn set_rolloff(&self, _source: SourceId, _rolloff: f32) -> AudioResult<()> {
        // This backend performs no distance attenuation of its own.
        Ok(())
    }
}

/// Queued entries fully covered by the callback's consumption counter.
/// After an explicit stop every queued entry is processed.
fn processed_entries(src: &CpalSource) -> usize {
    if src.stopped {
        return src.queue.len();
    }
    let consumed = src.shared.frames_consumed.load(Ordering::Acquire);
    let mut base = src.reclaimed_frames;
    let mut count = 0;
    for entry in &src.queue {
        if base + entry.frames <= consumed {
            base += entry.frames;
            count += 1;
        } else {
            break;
        }
    }
    count
}

// ═══════════════════════════════════════════════════════════════════════════
// STREAM THREAD
// ═══════════════════════════════════════════════════════════════════════════

fn run_source_stream(
    mut consumer: Consumer<f32>,
    shared: Arc<SourceShared>,
    ready: mpsc::Sender<AudioResult<(u32, u16)>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err(AudioError::BackendUnavailable(
            "no audio output device found".into(),
        )));
        return;
    };

    let config = match device.default_output_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready.send(Err(AudioError::BackendUnavailable(format!(
                "failed to get output config: {e}"
            ))));
            return;
        }
    };

    let channels = config.channels() as usize;
    let sample_rate = config.sample_rate();
    let cb_shared = Arc::clone(&shared);

    let stream = match device.build_output_stream(
        &config.into(),
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            fill_output(&mut consumer, &cb_shared, data, channels);
        },
        |err| log::error!("audio output stream error: {}", err),
        None,
    ) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(AudioError::BackendUnavailable(format!(
                "failed to build output stream: {e}"
            ))));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(AudioError::BackendCall(format!(
            "failed to start output stream: {e}"
        ))));
        return;
    }

    let _ = ready.send(Ok((sample_rate, channels as u16)));

    while !shared.shutdown.load(Ordering::Acquire) {
        thread::sleep(SHUTDOWN_POLL);
    }

    drop(stream);
}

/// Real-time callback body: pop, scale, write. No locks, no allocation.
fn fill_output(consumer: &mut Consumer<f32>, shared: &SourceShared, data: &mut [f32], channels: usize) {
    if shared.discard.swap(false, Ordering::AcqRel) {
        while consumer.pop().is_ok() {}
    }

    let playing = shared.playing.load(Ordering::Acquire);
    let gain = f32::from_bits(shared.gain.load(Ordering::Relaxed));
    let pan = f32::from_bits(shared.pan.load(Ordering::Relaxed));
    // Linear pan: unity at center
    let pan_l = (1.0 - pan.max(0.0)) * gain;
    let pan_r = (1.0 + pan.min(0.0)) * gain;

    let mut consumed = 0u64;
    for frame in data.chunks_mut(channels) {
        if !playing || consumer.slots() < channels {
            frame.fill(0.0);
            continue;
        }
        for (ch, out) in frame.iter_mut().enumerate() {
            let sample = consumer.pop().unwrap_or(0.0);
            let weight = match ch {
                0 => pan_l,
                1 => pan_r,
                _ => gain,
            };
            *out = sample * weight;
        }
        consumed += 1;
    }

    if consumed > 0 {
        shared.frames_consumed.fetch_add(consumed, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FORMAT CONVERSION
// ═══════════════════════════════════════════════════════════════════════════

/// Convert interleaved i16 PCM to the stream layout: linear resampling
/// (with pitch folded into the rate ratio), channel up/down-mix, and
/// i16 → f32 normalization.
fn convert_to_stream(
    pcm: &[Sample],
    in_channels: u16,
    in_rate: u32,
    pitch: f32,
    out_channels: u16,
    out_rate: u32,
) -> Vec<f32> {
    let in_channels = in_channels.max(1) as usize;
    let out_channels = out_channels.max(1) as usize;
    let in_frames = pcm.len() / in_channels;
    if in_frames == 0 {
        return Vec::new();
    }

    let ratio = out_rate as f64 / (in_rate.max(1) as f64 * pitch.max(0.001) as f64);
    let out_frames = ((in_frames as f64) * ratio).floor().max(1.0) as usize;
    let mut out = Vec::with_capacity(out_frames * out_channels);

    for i in 0..out_frames {
        let src_pos = i as f64 / ratio;
        let idx = (src_pos.floor() as usize).min(in_frames - 1);
        let next = (idx + 1).min(in_frames - 1);
        let frac = (src_pos - idx as f64) as f32;

        let sample_at = |frame: usize, ch: usize| -> f32 {
            let ch = ch.min(in_channels - 1);
            pcm[frame * in_channels + ch] as f32 / 32768.0
        };
        let interp = |ch: usize| -> f32 {
            sample_at(idx, ch) * (1.0 - frac) + sample_at(next, ch) * frac
        };

        let left = interp(0);
        let right = if in_channels > 1 { interp(1) } else { left };

        match out_channels {
            1 => out.push((left + right) * 0.5),
            2 => {
                out.push(left);
                out.push(right);
            }
            n => {
                out.push(left);
                out.push(right);
                for _ in 2..n {
                    out.push(0.0);
                }
            }
        }
    }

    out
}
