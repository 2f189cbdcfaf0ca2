//! Playback backend interface
//!
//! Provides:
//! - The [`PlaybackBackend`] capability trait: an OpenAL-shaped
//!   source/buffer-queue interface the engine drives
//! - [`NullBackend`], the silent null-object implementation used when no
//!   audio device is wanted (tests, headless hosts)
//!
//! A buffer holds one chunk of interleaved 16-bit PCM; a source owns a
//! FIFO of queued buffers. Buffers the source has finished playing are
//! "processed" and can be unqueued for reuse by the caller.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;

use sf_core::{Position3D, Sample};

use crate::{AudioError, AudioResult};

/// Opaque handle to a playback source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u32);

/// Opaque handle to a native PCM buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Playback state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Created, never played.
    Initial,
    /// Actively consuming queued buffers.
    Playing,
    /// Stopped, either explicitly or because the queue drained.
    Stopped,
}

/// Native playback interface consumed by the engine.
///
/// Implementations are shared across the control thread and the fill
/// worker; every method takes `&self` and synchronizes internally. The
/// engine serializes all calls for one source behind its own sync lock,
/// so implementations only need to be internally consistent, not
/// lock-free.
pub trait PlaybackBackend: Send + Sync {
    fn create_source(&self) -> AudioResult<SourceId>;

    fn destroy_source(&self, source: SourceId) -> AudioResult<()>;

    fn create_buffers(&self, count: usize) -> AudioResult<Vec<BufferId>>;

    fn destroy_buffers(&self, buffers: &[BufferId]) -> AudioResult<()>;

    /// Copy PCM into a buffer (setBufferData). The buffer must not be
    /// queued on any source.
    fn write_buffer(
        &self,
        buffer: BufferId,
        pcm: &[Sample],
        channels: u16,
        sample_rate: u32,
    ) -> AudioResult<()>;

    /// Append a filled buffer to the source's play queue.
    fn queue_buffer(&self, source: SourceId, buffer: BufferId) -> AudioResult<()>;

    /// Remove and return the oldest processed buffer, or `None` if no
    /// queued buffer has been fully played yet.
    fn unqueue_buffer(&self, source: SourceId) -> AudioResult<Option<BufferId>>;

    /// Number of buffers currently queued (processed included).
    fn queued_count(&self, source: SourceId) -> AudioResult<usize>;

    /// Number of queued buffers that have finished playing.
    fn processed_count(&self, source: SourceId) -> AudioResult<usize>;

    fn play(&self, source: SourceId) -> AudioResult<()>;

    /// Stop playback. All queued buffers become processed.
    fn stop(&self, source: SourceId) -> AudioResult<()>;

    /// Return the source to its initial state, discarding any PCM that
    /// was pushed toward the device but not yet played.
    fn rewind(&self, source: SourceId) -> AudioResult<()>;

    fn source_state(&self, source: SourceId) -> AudioResult<SourceState>;

    fn set_gain(&self, source: SourceId, gain: f32) -> AudioResult<()>;

    fn set_pitch(&self, source: SourceId, pitch: f32) -> AudioResult<()>;

    /// Source position in listener space.
    fn set_position(&self, source: SourceId, position: Position3D) -> AudioResult<()>;

    /// Built-in distance attenuation factor. The engine sets 0.0 and
    /// computes attenuation itself.
    fn set_rolloff(&self, source: SourceId, rolloff: f32) -> AudioResult<()>;
}

// ═══════════════════════════════════════════════════════════════════════════
// NULL BACKEND
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct NullSource {
    queued: VecDeque<BufferId>,
    started: bool,
    playing: bool,
}

#[derive(Debug, Default)]
struct NullState {
    next_id: u32,
    sources: HashMap<u32, NullSource>,
    buffers: HashSet<u32>,
}

/// Null-object backend: every call succeeds and no audio is produced.
///
/// Queued buffers count as processed immediately, so a pipeline running
/// against this backend drains its playlist at the fill-cycle rate and
/// reaches its normal end-of-stream handshake — silence, not a stall.
#[derive(Debug, Default)]
pub struct NullBackend {
    state: Mutex<NullState>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn unknown_source() -> AudioError {
    AudioError::BackendCall("unknown source id".into())
}

impl PlaybackBackend for NullBackend {
    fn create_source(&self) -> AudioResult<SourceId> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.sources.insert(id, NullSource::default());
        Ok(SourceId(id))
    }

    fn destroy_source(&self, source: SourceId) -> AudioResult<()> {
        self.state.lock().sources.remove(&source.0);
        Ok(())
    }

    fn create_buffers(&self, count: usize) -> AudioResult<Vec<BufferId>> {
        let mut state = self.state.lock();
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            state.next_id += 1;
            let id = state.next_id;
            state.buffers.insert(id);
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
        _pcm: &[Sample],
        _channels: u16,
        _sample_rate: u32,
    ) -> AudioResult<()> {
        let state = self.state.lock();
        if state.buffers.contains(&buffer.0) {
            Ok(())
        } else {
            Err(AudioError::BackendCall("unknown buffer id".into()))
        }
    }

    fn queue_buffer(&self, source: SourceId, buffer: BufferId) -> AudioResult<()> {
        let mut state = self.state.lock();
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown_source)?;
        src.queued.push_back(buffer);
        Ok(())
    }

    fn unqueue_buffer(&self, source: SourceId) -> AudioResult<Option<BufferId>> {
        let mut state = self.state.lock();
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown_source)?;
        Ok(src.queued.pop_front())
    }

    fn queued_count(&self, source: SourceId) -> AudioResult<usize> {
        let state = self.state.lock();
        let src = state.sources.get(&source.0).ok_or_else(unknown_source)?;
        Ok(src.queued.len())
    }

    fn processed_count(&self, source: SourceId) -> AudioResult<usize> {
        // Everything queued is consumed instantly.
        self.queued_count(source)
    }

    fn play(&self, source: SourceId) -> AudioResult<()> {
        let mut state = self.state.lock();
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown_source)?;
        src.started = true;
        src.playing = true;
        Ok(())
    }

    fn stop(&self, source: SourceId) -> AudioResult<()> {
        let mut state = self.state.lock();
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown_source)?;
        src.playing = false;
        Ok(())
    }

    fn rewind(&self, source: SourceId) -> AudioResult<()> {
        let mut state = self.state.lock();
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown_source)?;
        src.queued.clear();
        src.playing = false;
        src.started = false;
        Ok(())
    }

    fn source_state(&self, source: SourceId) -> AudioResult<SourceState> {
        let state = self.state.lock();
        let src = state.sources.get(&source.0).ok_or_else(unknown_source)?;
        if !src.started {
            Ok(SourceState::Initial)
        } else if src.playing && !src.queued.is_empty() {
            Ok(SourceState::Playing)
        } else {
            Ok(SourceState::Stopped)
        }
    }

    fn set_gain(&self, _source: SourceId, _gain: f32) -> AudioResult<()> {
        Ok(())
    }

    fn set_pitch(&self, _source: SourceId, _pitch: f32) -> AudioResult<()> {
        Ok(())
    }

    fn set_position(&self, _source: SourceId, _position: Position3D) -> AudioResult<()> {
        Ok(())
    }

    fn set_rolloff(&self, _source: SourceId, _rolloff: f32) -> AudioResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_backend_queue_is_processed_immediately() {
        let backend = NullBackend::new();
        let source = backend.create_source().unwrap();
        let buffers = backend.create_buffers(3).unwrap();

        for &buf in &buffers {
            backend.write_buffer(buf, &[0; 64], 1, 44100).unwrap();
            backend.queue_buffer(source, buf).unwrap();
        }

        assert_eq!(backend.queued_count(source).unwrap(), 3);
        assert_eq!(backend.processed_count(source).unwrap(), 3);

        assert_eq!(backend.unqueue_buffer(source).unwrap(), Some(buffers[0]));
        assert_eq!(backend.queued_count(source).unwrap(), 2);
    }

    #[test]
    fn test_null_backend_state_transitions() {
        let backend = NullBackend::new();
        let source = backend.create_source().unwrap();
        assert_eq!(backend.source_state(source).unwrap(), SourceState::Initial);

        let buffers = backend.create_buffers(1).unwrap();
        backend.queue_buffer(source, buffers[0]).unwrap();
        backend.play(source).unwrap();
        assert_eq!(backend.source_state(source).unwrap(), SourceState::Playing);

        backend.unqueue_buffer(source).unwrap();
        assert_eq!(backend.source_state(source).unwrap(), SourceState::Stopped);

        backend.rewind(source).unwrap();
        assert_eq!(backend.source_state(source).unwrap(), SourceState::Initial);
    }

    #[test]
    fn test_null_backend_unknown_source_is_an_error() {
        let backend = NullBackend::new();
        assert!(backend.play(SourceId(99)).is_err());
        assert!(backend.queued_count(SourceId(99)).is_err());
    }
}
