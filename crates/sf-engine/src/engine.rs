//! Playback engine
//!
//! Owns the native playback source, the buffer ring, and the clip
//! source, and runs the fill cycle that moves decoded PCM into the
//! backend. The cycle is scheduled by a [`FillDriver`] — worker thread
//! or cooperative poll — with an identical public API either way.
//!
//! Locking: every mutation of clip/ring/source state happens under the
//! single per-engine sync lock. `stop()` never holds that lock while
//! joining the worker: it flags the stop, wakes and joins the driver,
//! and only then re-acquires the lock for native teardown. Teardown
//! itself never runs on the worker — end-of-stream inside the fill
//! cycle parks the engine in `Stopping` for the control thread to
//! finish.

use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use sf_audio::{
    AudioError, AudioResult, CpalBackend, DecodeBackend, PlaybackBackend, SourceId, SourceState,
    SymphoniaDecoder,
};
use sf_core::{AudioSettings, Position3D, Sample};

use crate::{
    BufferRing, ClipSource, FillCycle, FillDriver, ListenerPose, SoundGeometry, ThreadDriver,
    ellipsoid_gain, listener_space_position,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Stopped,
    Running,
    /// End-of-stream or session failure observed; the control thread
    /// completes the stop.
    Stopping,
}

struct EngineInner {
    clip: ClipSource,
    settings: AudioSettings,
    source: Option<SourceId>,
    ring: Option<BufferRing>,
    state: EngineState,
    /// Native play has been issued for this session.
    playing_started: bool,
    /// The clip returned 0 frames; drain and flush.
    end_of_stream: bool,
    /// The flush handshake went out (at most once per session).
    flush_sent: bool,
    /// The session ended by playing out, not by an external stop.
    session_finished: bool,
    /// Backend unavailable; every start degrades to a silent no-op.
    disabled: bool,
    scratch: Vec<Sample>,
}

struct EngineShared {
    backend: Arc<dyn PlaybackBackend>,
    sync: Mutex<EngineInner>,
    /// Checked by the fill cycle before taking the sync lock, so an
    /// in-flight cycle backs off as soon as a stop begins.
    stop_requested: AtomicBool,
}

/// Spatializer/sink side of the pipeline.
pub struct PlaybackEngine {
    shared: Arc<EngineShared>,
    driver: Mutex<Box<dyn FillDriver>>,
}

impl PlaybackEngine {
    pub fn new(
        backend: Arc<dyn PlaybackBackend>,
        decoder: Arc<dyn DecodeBackend>,
        settings: AudioSettings,
        driver: Box<dyn FillDriver>,
    ) -> Self {
        let clip = ClipSource::new(decoder, settings.pause_between_tracks);
        Self {
            shared: Arc::new(EngineShared {
                backend,
                sync: Mutex::new(EngineInner {
                    clip,
                    settings,
                    source: None,
                    ring: None,
                    state: EngineState::Stopped,
                    playing_started: false,
                    end_of_stream: false,
                    flush_sent: false,
                    session_finished: false,
                    disabled: false,
                    scratch: Vec::new(),
                }),
                stop_requested: AtomicBool::new(false),
            }),
            driver: Mutex::new(driver),
        }
    }

    /// Engine over the default cpal output device and symphonia
    /// decoding, with process-default settings and a worker thread.
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(CpalBackend::new()),
            Arc::new(SymphoniaDecoder::new()),
            AudioSettings::process_default(),
            Box::new(ThreadDriver::new()),
        )
    }

    /// Access the clip source under the engine's sync lock.
    pub fn clip(&self) -> MappedMutexGuard<'_, ClipSource> {
        MutexGuard::map(self.shared.sync.lock(), |inner| &mut inner.clip)
    }

    pub fn settings(&self) -> AudioSettings {
        self.shared.sync.lock().settings.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.sync.lock().state == EngineState::Running
    }

    /// The worker finished or failed the session; `stop()` should be
    /// called from the control thread to tear down.
    pub fn needs_stop(&self) -> bool {
        self.shared.sync.lock().state == EngineState::Stopping
    }

    /// The last session played out to its natural end.
    pub fn session_finished(&self) -> bool {
        self.shared.sync.lock().session_finished
    }

    /// Start a playback session. No-op when already running or when the
    /// backend is unavailable (warned once per process, then silent).
    ///
    /// `spatialize` fixes the session channel layout: mono buffers for
    /// a spatialized source, stereo otherwise. Toggling it requires a
    /// stop/restart.
    pub fn start(&self, spatialize: bool) -> AudioResult<()> {
        let mut inner = self.shared.sync.lock();
        match inner.state {
            EngineState::Running => return Ok(()),
            EngineState::Stopping => {
                // Finish the pending teardown, then start fresh
                drop(inner);
                self.stop()?;
                inner = self.shared.sync.lock();
            }
            EngineState::Stopped => {}
        }
        if inner.disabled {
            return Ok(());
        }

        let source = match self.shared.backend.create_source() {
            Ok(source) => source,
            Err(AudioError::BackendUnavailable(reason)) => {
                warn_backend_unavailable(&reason);
                inner.disabled = true;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = start_session(&mut inner, &self.shared.backend, source, spatialize) {
            inner.clip.stop_playing();
            let _ = self.shared.backend.destroy_source(source);
            return Err(e);
        }
        let interval = inner.settings.poll_interval;
        drop(inner);

        self.shared.stop_requested.store(false, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let cycle: FillCycle = Arc::new(move || fill_cycle(&shared));
        self.driver.lock().start(interval, cycle);

        log::info!("playback started");
        Ok(())
    }

    /// Stop playback and release native resources. Idempotent, safe to
    /// call concurrently with an in-flight fill cycle, and must never be
    /// called from the worker itself (the driver join would self-wait).
    pub fn stop(&self) -> AudioResult<()> {
        {
            let mut inner = self.shared.sync.lock();
            if inner.state == EngineState::Stopped {
                return Ok(());
            }
            inner.state = EngineState::Stopping;
        }

        // Signal first so an in-flight cycle exits early; the sync lock
        // is released while joining.
        self.shared.stop_requested.store(true, Ordering::Release);
        self.driver.lock().stop();

        let mut inner = self.shared.sync.lock();
        let backend = &self.shared.backend;
        if let Some(source) = inner.source.take() {
            if let Err(e) = backend.stop(source) {
                log::error!("failed to stop playback source: {}", e);
            }
            if let Some(mut ring) = inner.ring.take() {
                if let Err(e) = ring.clear() {
                    log::error!("failed to clear buffer queue: {}", e);
                }
                if let Err(e) = backend.rewind(source) {
                    log::error!("failed to rewind playback source: {}", e);
                }
                if let Err(e) = ring.destroy() {
                    log::error!("failed to release buffers: {}", e);
                }
            }
            if let Err(e) = backend.destroy_source(source) {
                log::error!("failed to release playback source: {}", e);
            }
            log::info!("playback stopped");
        }
        inner.clip.stop_playing();
        inner.playing_started = false;
        inner.state = EngineState::Stopped;
        Ok(())
    }

    /// Run a due fill cycle on cooperative drivers. No-op for threaded
    /// drivers.
    pub fn pump(&self) {
        self.driver.lock().pump();
    }

    /// Per-tick spatial update: gain from the ellipsoid model (times
    /// intensity and listener gain) and the listener-space position —
    /// zeroed when spatialization is off.
    pub fn update(&self, listener: &ListenerPose, geometry: &SoundGeometry) -> AudioResult<()> {
        let inner = self.shared.sync.lock();
        if inner.state != EngineState::Running {
            return Ok(());
        }
        let Some(source) = inner.source else {
            return Ok(());
        };
        let backend = &self.shared.backend;

        if geometry.spatialize {
            let gain =
                ellipsoid_gain(geometry, &listener.position) * geometry.intensity * listener.gain;
            backend.set_gain(source, gain.max(0.0))?;
            backend.set_position(source, listener_space_position(geometry, listener))?;
        } else {
            backend.set_gain(source, (geometry.intensity * listener.gain).max(0.0))?;
            backend.set_position(source, Position3D::origin())?;
        }
        Ok(())
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn start_session(
    inner: &mut EngineInner,
    backend: &Arc<dyn PlaybackBackend>,
    source: SourceId,
    spatialize: bool,
) -> AudioResult<()> {
    // Attenuation is computed explicitly in update()
    backend.set_rolloff(source, 0.0)?;
    backend.set_pitch(source, inner.clip.pitch())?;

    let channels: u16 = if spatialize { 1 } else { 2 };
    inner.clip.start_playing(channels);

    if !inner.settings.covers_poll_interval(inner.clip.sample_rate()) {
        log::warn!(
            "buffer pool ({} x {} frames) holds less than two poll intervals of audio; underruns likely",
            inner.settings.num_buffers,
            inner.settings.buffer_frames
        );
    }

    let ring = BufferRing::allocate(Arc::clone(backend), source, inner.settings.num_buffers)?;
    inner
        .scratch
        .resize(inner.settings.buffer_frames * channels as usize, 0);
    inner.source = Some(source);
    inner.ring = Some(ring);
    inner.playing_started = false;
    inner.end_of_stream = false;
    inner.flush_sent = false;
    inner.session_finished = false;
    inner.state = EngineState::Running;
    Ok(())
}

fn fill_cycle(shared: &EngineShared) {
    if shared.stop_requested.load(Ordering::Acquire) {
        return;
    }
    let mut inner = shared.sync.lock();
    if inner.state != EngineState::Running {
        return;
    }
    if let Err(e) = fill_cycle_inner(&mut inner, &shared.backend) {
        // Fatal for this session only; the control thread tears down
        log::error!("playback session failed: {}", e);
        inner.state = EngineState::Stopping;
    }
}

fn fill_cycle_inner(
    inner: &mut EngineInner,
    backend: &Arc<dyn PlaybackBackend>,
) -> AudioResult<()> {
    let EngineInner {
        clip,
        ring,
        scratch,
        source,
        playing_started,
        end_of_stream,
        flush_sent,
        session_finished,
        state,
        ..
    } = inner;
    let (Some(ring), Some(source)) = (ring.as_mut(), *source) else {
        return Ok(());
    };

    ring.reclaim_processed()?;

    if !*end_of_stream {
        // Bounded per cycle so instantly-draining backends cannot pin
        // the worker inside one cycle
        let mut refills = 0;
        while refills < ring.capacity() && ring.can_acquire()? {
            let id = ring.acquire_or_recycle()?;
            let frames = clip.fill(Some(&mut scratch[..]));
            if frames == 0 {
                ring.release(id);
                *end_of_stream = true;
                break;
            }
            let channels = clip.channels();
            ring.submit(
                id,
                &scratch[..frames * channels as usize],
                channels,
                clip.sample_rate(),
            )?;
            refills += 1;
        }

        if !*playing_started && ring.queued_len() > 0 {
            backend.play(source)?;
            *playing_started = true;
        }
    }

    // Underrun: the device ran dry while unplayed buffers remain queued
    if *playing_started
        && ring.queued_len() > 0
        && backend.source_state(source)? == SourceState::Stopped
    {
        log::warn!("buffer underrun, restarting playback source");
        backend.play(source)?;
    }

    if *end_of_stream && ring.queued_len() == 0 && !*flush_sent {
        // Everything drained after a natural end: flush handshake, once
        clip.fill(None);
        *flush_sent = true;
        *session_finished = true;
        *state = EngineState::Stopping;
    }
    Ok(())
}

static BACKEND_WARN_ONCE: Once = Once::new();

fn warn_backend_unavailable(reason: &str) {
    BACKEND_WARN_ONCE.call_once(|| {
        log::warn!("audio backend unavailable, sound is disabled: {}", reason);
    });
}
