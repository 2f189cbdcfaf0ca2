//! Pipeline integration tests
//!
//! End-to-end scenarios over scripted mock backends:
//! - Exact buffer accounting for a known-length track, including the
//!   end-of-stream flush handshake
//! - Loop playback never starving the queue
//! - Steady-state queue occupancy at the reference configuration
//!   (5 buffers x 4410 frames @ 44.1 kHz)
//! - Start/stop idempotence and resource-leak checks
//! - Underrun recovery
//! - Teardown while running on the threaded driver

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use sf_audio::{
    AudioError, AudioResult, BufferId, DecodeBackend, DecodedStream, PlaybackBackend, SourceId,
    SourceState,
};
use sf_core::{AudioSettings, Position3D, Sample};
use sf_engine::{ListenerPose, PlaybackEngine, PollDriver, SoundGeometry, ThreadDriver};

// ═══════════════════════════════════════════════════════════════════════════
// SCRIPTED PLAYBACK BACKEND
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct MockSource {
    queued: VecDeque<u32>,
    processed: usize,
    started: bool,
    playing: bool,
}

#[derive(Default)]
struct MockState {
    next_id: u32,
    last_source: u32,
    sources: HashMap<u32, MockSource>,
    buffers: HashMap<u32, usize>,
    /// Frame count of each buffer at the moment it was queued.
    submitted_frames: Vec<usize>,
    sources_created: usize,
    play_calls: usize,
    last_pitch: Option<f32>,
    last_gain: Option<f32>,
    last_position: Option<Position3D>,
    last_rolloff: Option<f32>,
}

/// Playback backend whose buffer consumption is driven by the test via
/// [`MockBackend::advance`].
#[derive(Default)]
struct MockBackend {
    state: Mutex<MockState>,
    fail_create: bool,
}

impl MockBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            fail_create: true,
            ..Self::default()
        })
    }

    /// Mark the `count` oldest unplayed buffers as finished.
    fn advance(&self, source: SourceId, count: usize) {
        let mut state = self.state.lock();
        if let Some(src) = state.sources.get_mut(&source.0) {
            src.processed = (src.processed + count).min(src.queued.len());
        }
    }

    /// Simulate the device dying mid-queue (underrun).
    fn force_stopped(&self, source: SourceId) {
        let mut state = self.state.lock();
        if let Some(src) = state.sources.get_mut(&source.0) {
            src.playing = false;
        }
    }

    fn last_source(&self) -> SourceId {
        SourceId(self.state.lock().last_source)
    }

    fn sources_alive(&self) -> usize {
        self.state.lock().sources.len()
    }

    fn buffers_alive(&self) -> usize {
        self.state.lock().buffers.len()
    }

    fn sources_created(&self) -> usize {
        self.state.lock().sources_created
    }

    fn play_calls(&self) -> usize {
        self.state.lock().play_calls
    }

    fn queued_len(&self, source: SourceId) -> usize {
        self.state.lock().sources[&source.0].queued.len()
    }

    fn submitted_frames(&self) -> Vec<usize> {
        self.state.lock().submitted_frames.clone()
    }

    fn last_pitch(&self) -> Option<f32> {
        self.state.lock().last_pitch
    }

    fn last_gain(&self) -> Option<f32> {
        self.state.lock().last_gain
    }

    fn last_position(&self) -> Option<Position3D> {
        self.state.lock().last_position
    }

    fn last_rolloff(&self) -> Option<f32> {
        self.state.lock().last_rolloff
    }
}

fn unknown() -> AudioError {
    AudioError::BackendCall("unknown id".into())
}

impl PlaybackBackend for MockBackend {
    fn create_source(&self) -> AudioResult<SourceId> {
        if self.fail_create {
            return Err(AudioError::BackendUnavailable("no device (scripted)".into()));
        }
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.last_source = id;
        state.sources.insert(id, MockSource::default());
        state.sources_created += 1;
        Ok(SourceId(id))
    }

    fn destroy_source(&self, source: SourceId) -> AudioResult<()> {
        self.state.lock().sources.remove(&source.0);
        Ok(())
    }

    fn create_buffers(&self, count: usize) -> AudioResult<Vec<BufferId>> {
        let mut state = self.state.lock();
        let mut ids = Vec::new();
        for _ in 0..count {
            state.next_id += 1;
            let id = state.next_id;
            state.buffers.insert(id, 0);
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
        _sample_rate: u32,
    ) -> AudioResult<()> {
        let mut state = self.state.lock();
        let slot = state.buffers.get_mut(&buffer.0).ok_or_else(unknown)?;
        *slot = pcm.len() / channels.max(1) as usize;
        Ok(())
    }

    fn queue_buffer(&self, source: SourceId, buffer: BufferId) -> AudioResult<()> {
        let mut state = self.state.lock();
        let frames = *state.buffers.get(&buffer.0).ok_or_else(unknown)?;
        state.submitted_frames.push(frames);
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown)?;
        src.queued.push_back(buffer.0);
        Ok(())
    }

    fn unqueue_buffer(&self, source: SourceId) -> AudioResult<Option<BufferId>> {
        let mut state = self.state.lock();
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown)?;
        if src.processed == 0 {
            return Ok(None);
        }
        src.processed -= 1;
        Ok(src.queued.pop_front().map(BufferId))
    }

    fn queued_count(&self, source: SourceId) -> AudioResult<usize> {
        let state = self.state.lock();
        Ok(state.sources.get(&source.0).ok_or_else(unknown)?.queued.len())
    }

    fn processed_count(&self, source: SourceId) -> AudioResult<usize> {
        let state = self.state.lock();
        Ok(state.sources.get(&source.0).ok_or_else(unknown)?.processed)
    }

    fn play(&self, source: SourceId) -> AudioResult<()> {
        let mut state = self.state.lock();
        state.play_calls += 1;
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown)?;
        src.started = true;
        src.playing = true;
        Ok(())
    }

    fn stop(&self, source: SourceId) -> AudioResult<()> {
        let mut state = self.state.lock();
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown)?;
        src.playing = false;
        // Stopping makes every queued buffer reclaimable
        src.processed = src.queued.len();
        Ok(())
    }

    fn rewind(&self, source: SourceId) -> AudioResult<()> {
        let mut state = self.state.lock();
        let src = state.sources.get_mut(&source.0).ok_or_else(unknown)?;
        src.queued.clear();
        src.processed = 0;
        src.started = false;
        src.playing = false;
        Ok(())
    }

    fn source_state(&self, source: SourceId) -> AudioResult<SourceState> {
        let state = self.state.lock();
        let src = state.sources.get(&source.0).ok_or_else(unknown)?;
        if !src.started {
            Ok(SourceState::Initial)
        } else if src.playing {
            Ok(SourceState::Playing)
        } else {
            Ok(SourceState::Stopped)
        }
    }

    fn set_gain(&self, _source: SourceId, gain: f32) -> AudioResult<()> {
        self.state.lock().last_gain = Some(gain);
        Ok(())
    }

    fn set_pitch(&self, _source: SourceId, pitch: f32) -> AudioResult<()> {
        self.state.lock().last_pitch = Some(pitch);
        Ok(())
    }

    fn set_position(&self, _source: SourceId, position: Position3D) -> AudioResult<()> {
        self.state.lock().last_position = Some(position);
        Ok(())
    }

    fn set_rolloff(&self, _source: SourceId, rolloff: f32) -> AudioResult<()> {
        self.state.lock().last_rolloff = Some(rolloff);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SCRIPTED DECODER
// ═══════════════════════════════════════════════════════════════════════════

struct FixedStream {
    remaining: usize,
}

impl DecodedStream for FixedStream {
    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        44100
    }

    fn read_frames(&mut self, dest: &mut [Sample]) -> AudioResult<usize> {
        let give = dest.len().min(self.remaining);
        dest[..give].fill(5);
        self.remaining -= give;
        Ok(give)
    }
}

/// Decoder serving mono 44.1 kHz tracks of scripted lengths.
struct FixedDecoder {
    tracks: HashMap<PathBuf, usize>,
}

impl FixedDecoder {
    fn single(path: &str, frames: usize) -> Arc<Self> {
        let mut tracks = HashMap::new();
        tracks.insert(PathBuf::from(path), frames);
        Arc::new(Self { tracks })
    }
}

impl DecodeBackend for FixedDecoder {
    fn open(&self, path: &Path) -> AudioResult<Box<dyn DecodedStream>> {
        let frames = self
            .tracks
            .get(path)
            .copied()
            .ok_or_else(|| AudioError::NotFound(path.to_path_buf()))?;
        Ok(Box::new(FixedStream { remaining: frames }))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════

fn reference_settings() -> AudioSettings {
    AudioSettings {
        buffer_frames: 4410,
        num_buffers: 5,
        poll_interval: Duration::ZERO,
        pause_between_tracks: Duration::ZERO,
    }
}

fn poll_engine(
    backend: Arc<MockBackend>,
    decoder: Arc<FixedDecoder>,
    settings: AudioSettings,
) -> PlaybackEngine {
    let engine = PlaybackEngine::new(backend, decoder, settings, Box::new(PollDriver::new()));
    engine.clip().set_playlist(vec![PathBuf::from("track.wav")]);
    engine
}

// ═══════════════════════════════════════════════════════════════════════════
// SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_exact_track_yields_three_full_buffers_then_flush() {
    let backend = MockBackend::new();
    let decoder = FixedDecoder::single("track.wav", 3 * 4410);
    let engine = poll_engine(backend.clone(), decoder, reference_settings());

    engine.start(true).unwrap();
    let source = backend.last_source();

    // First cycle: three full fills, then a fill returning 0
    engine.pump();
    assert_eq!(backend.submitted_frames(), vec![4410, 4410, 4410]);
    assert_eq!(backend.queued_len(source), 3);
    assert!(!engine.clip().is_finished());
    assert!(engine.is_running());

    // Play everything out; the next cycle reclaims and flushes
    backend.advance(source, 3);
    engine.pump();
    assert!(engine.session_finished());
    assert!(engine.clip().is_finished());
    assert!(engine.needs_stop());

    // Further cycles are no-ops: the flush went out exactly once
    engine.pump();
    engine.pump();
    assert!(engine.clip().is_finished());

    engine.stop().unwrap();
    assert_eq!(backend.sources_alive(), 0);
    assert_eq!(backend.buffers_alive(), 0);
}

#[test]
fn test_looping_track_never_starves_the_queue() {
    let backend = MockBackend::new();
    let decoder = FixedDecoder::single("track.wav", 1000);
    let settings = AudioSettings {
        buffer_frames: 300,
        num_buffers: 4,
        ..reference_settings()
    };
    let engine = poll_engine(backend.clone(), decoder, settings);
    engine.clip().set_looping(true);

    engine.start(true).unwrap();
    let source = backend.last_source();

    engine.pump();
    assert_eq!(backend.queued_len(source), 4);

    for _ in 0..10 {
        backend.advance(source, 1);
        engine.pump();
        assert_eq!(backend.queued_len(source), 4, "queue refilled to capacity");
        assert!(engine.is_running());
        assert!(!engine.needs_stop());
    }

    engine.stop().unwrap();
}

#[test]
fn test_reference_configuration_keeps_queue_at_capacity() {
    // 5 x 4410 frames at 44.1 kHz = 500 ms buffered; a 250 ms poll
    // plays at most 2.5 buffers between cycles
    let backend = MockBackend::new();
    let decoder = FixedDecoder::single("track.wav", 44100 * 5);
    let engine = poll_engine(backend.clone(), decoder, reference_settings());

    assert!(reference_settings().covers_poll_interval(44100));

    engine.start(true).unwrap();
    let source = backend.last_source();

    engine.pump();
    assert_eq!(backend.queued_len(source), 5);

    for _ in 0..8 {
        backend.advance(source, 2);
        engine.pump();
        assert_eq!(backend.queued_len(source), 5, "steady state at capacity");
    }

    engine.stop().unwrap();
}

#[test]
fn test_start_while_running_does_not_leak_a_second_source() {
    let backend = MockBackend::new();
    let decoder = FixedDecoder::single("track.wav", 44100);
    let engine = poll_engine(backend.clone(), decoder, reference_settings());

    engine.start(true).unwrap();
    engine.pump();
    engine.start(true).unwrap();

    assert_eq!(backend.sources_created(), 1);
    engine.stop().unwrap();
}

#[test]
fn test_stop_twice_has_same_final_state() {
    let backend = MockBackend::new();
    let decoder = FixedDecoder::single("track.wav", 44100);
    let engine = poll_engine(backend.clone(), decoder, reference_settings());

    engine.start(true).unwrap();
    engine.pump();

    engine.stop().unwrap();
    assert!(!engine.is_running());
    assert_eq!(backend.sources_alive(), 0);
    assert_eq!(backend.buffers_alive(), 0);

    engine.stop().unwrap();
    assert!(!engine.is_running());
    assert_eq!(backend.sources_alive(), 0);
    assert_eq!(backend.buffers_alive(), 0);
}

#[test]
fn test_underrun_recovery_reissues_play() {
    let backend = MockBackend::new();
    let decoder = FixedDecoder::single("track.wav", 44100 * 5);
    let engine = poll_engine(backend.clone(), decoder, reference_settings());

    engine.start(true).unwrap();
    let source = backend.last_source();

    engine.pump();
    assert_eq!(backend.play_calls(), 1);

    // Device ran dry with unplayed buffers still queued
    backend.force_stopped(source);
    engine.pump();
    assert_eq!(backend.play_calls(), 2, "engine re-issued play");
    assert!(engine.is_running());

    engine.stop().unwrap();
}

#[test]
fn test_teardown_while_running_joins_the_worker() {
    let backend = MockBackend::new();
    let decoder = FixedDecoder::single("track.wav", 1000);
    let settings = AudioSettings {
        buffer_frames: 100,
        num_buffers: 3,
        poll_interval: Duration::from_millis(10),
        pause_between_tracks: Duration::ZERO,
    };
    let engine = PlaybackEngine::new(
        backend.clone(),
        decoder,
        settings,
        Box::new(ThreadDriver::new()),
    );
    engine.clip().set_playlist(vec![PathBuf::from("track.wav")]);
    engine.clip().set_looping(true);

    engine.start(true).unwrap();
    std::thread::sleep(Duration::from_millis(25));
    assert!(engine.is_running());

    // Drop stops the engine: signal, join, tear down
    drop(engine);
    assert_eq!(backend.sources_alive(), 0);
    assert_eq!(backend.buffers_alive(), 0);
}

#[test]
fn test_unavailable_backend_degrades_to_silent_noop() {
    let backend = MockBackend::unavailable();
    let decoder = FixedDecoder::single("track.wav", 44100);
    let engine = poll_engine(backend.clone(), decoder, reference_settings());

    engine.start(true).unwrap();
    assert!(!engine.is_running());
    assert_eq!(backend.sources_created(), 0);

    // Still a no-op on retry
    engine.start(true).unwrap();
    assert!(!engine.is_running());
}

#[test]
fn test_session_snapshot_of_pitch_and_rolloff() {
    let backend = MockBackend::new();
    let decoder = FixedDecoder::single("track.wav", 44100 * 5);
    let engine = poll_engine(backend.clone(), decoder, reference_settings());

    engine.clip().set_pitch(2.0);
    engine.start(true).unwrap();

    assert_eq!(backend.last_pitch(), Some(2.0));
    assert_eq!(backend.last_rolloff(), Some(0.0));

    // No live retune: a pitch change while active is not forwarded
    engine.clip().set_pitch(0.5);
    engine.pump();
    assert_eq!(backend.last_pitch(), Some(2.0));

    engine.stop().unwrap();
}

#[test]
fn test_spatial_update_feeds_gain_and_position() {
    let backend = MockBackend::new();
    let decoder = FixedDecoder::single("track.wav", 44100 * 5);
    let engine = poll_engine(backend.clone(), decoder, reference_settings());

    engine.start(true).unwrap();
    engine.pump();

    let listener = ListenerPose::default();
    let geometry = SoundGeometry {
        position: Position3D::new(0.0, 0.0, -0.5),
        intensity: 0.8,
        ..Default::default()
    };

    // Inside the inner ellipsoid: full distance gain times intensity
    engine.update(&listener, &geometry).unwrap();
    assert_eq!(backend.last_gain(), Some(0.8));
    let position = backend.last_position().unwrap();
    assert!((position.z - (-0.5)).abs() < 1e-6);

    // Spatialization off: position zeroed
    let flat = SoundGeometry {
        spatialize: false,
        ..geometry
    };
    engine.update(&listener, &flat).unwrap();
    assert_eq!(backend.last_position(), Some(Position3D::origin()));

    engine.stop().unwrap();
}
