//! Scene binding
//!
//! The thin adapter between the scene graph and the pipeline. Exactly
//! three external events flow through it: field-change notifications,
//! the per-frame render tick with listener geometry, and teardown when
//! the owning node dies. The binding owns the engine; the scene graph
//! holds the binding.

use std::path::PathBuf;

use sf_core::Seconds;

use crate::{ListenerPose, PlaybackEngine, PlaylistResolver, SoundGeometry};

/// Activation edges produced by one render tick, for hosts that emit
/// isActive-style events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub became_active: bool,
    pub became_inactive: bool,
}

/// Scene-facing handle for one sound node.
pub struct SoundBinding {
    engine: PlaybackEngine,
    geometry: SoundGeometry,
    playlist: Vec<PathBuf>,
    was_active: bool,
    /// Start time already honored. A start time is edge-triggered: once
    /// a session ran for it, the window does not re-trigger until the
    /// field (or the source) changes.
    start_honored: Option<Seconds>,
}

impl SoundBinding {
    pub fn new(engine: PlaybackEngine) -> Self {
        Self {
            engine,
            geometry: SoundGeometry::default(),
            playlist: Vec::new(),
            was_active: false,
            start_honored: None,
        }
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn geometry(&self) -> &SoundGeometry {
        &self.geometry
    }

    /// The clip's url field changed: re-resolve, and when the resolved
    /// identity differs, stop playback and rebind.
    pub fn set_source(&mut self, urls: &[String], search_paths: &[PathBuf]) {
        let resolved = PlaylistResolver::resolve(urls, search_paths);
        if resolved == self.playlist {
            return;
        }
        let _ = self.engine.stop();
        self.playlist = resolved.clone();
        self.engine.clip().set_playlist(resolved);
        self.start_honored = None;
    }

    pub fn set_description(&mut self, description: &str) {
        self.engine.clip().set_description(description);
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.engine.clip().set_looping(looping);
    }

    /// Takes effect at the next session start; an active session keeps
    /// its pitch.
    pub fn set_pitch(&mut self, pitch: f32) {
        self.engine.clip().set_pitch(pitch);
    }

    pub fn set_start_time(&mut self, time: Seconds) {
        self.engine.clip().set_start_time(time);
    }

    pub fn set_stop_time(&mut self, time: Seconds) {
        self.engine.clip().set_stop_time(time);
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.geometry.intensity = intensity.max(0.0);
    }

    /// Update source placement (position, direction, ellipsoid radii).
    /// Spatialize toggles go through [`Self::set_spatialize`].
    pub fn set_geometry(&mut self, geometry: SoundGeometry) {
        let spatialize = self.geometry.spatialize;
        self.geometry = geometry;
        self.geometry.spatialize = spatialize;
    }

    /// Switching between spatialized (mono) and plain (stereo) output
    /// changes the buffer channel layout, so an active session is
    /// restarted.
    pub fn set_spatialize(&mut self, spatialize: bool) {
        if self.geometry.spatialize == spatialize {
            return;
        }
        let was_running = self.engine.is_running();
        let _ = self.engine.stop();
        self.geometry.spatialize = spatialize;
        if was_running {
            let _ = self.engine.start(spatialize);
        }
    }

    /// Per-frame entry point: drives the start/stop time window, runs a
    /// due fill cycle on cooperative drivers, and feeds the listener
    /// geometry to the engine.
    pub fn render_tick(&mut self, now: Seconds, listener: &ListenerPose) -> TickOutcome {
        // Finish a stop the worker requested (end of stream or failure)
        if self.engine.needs_stop() {
            let _ = self.engine.stop();
        }

        let (should_start, should_stop, start_time) = {
            let clip = self.engine.clip();
            (
                clip.should_start(now),
                clip.should_stop(now),
                clip.start_time(),
            )
        };
        if should_stop {
            let _ = self.engine.stop();
        } else if should_start && self.start_honored != Some(start_time) {
            if self.engine.start(self.geometry.spatialize).is_ok() {
                self.start_honored = Some(start_time);
            }
        }

        // Activation is sampled here: a session that finishes inside the
        // pump below reports its inactive edge on the next tick.
        let active = self.engine.is_running();

        self.engine.pump();
        if let Err(e) = self.engine.update(listener, &self.geometry) {
            log::error!("spatial update failed: {}", e);
            let _ = self.engine.stop();
        }

        let outcome = TickOutcome {
            became_active: active && !self.was_active,
            became_inactive: !active && self.was_active,
        };
        self.was_active = active;
        outcome
    }

    /// Node teardown: stop playback (joining the worker), then drop
    /// owned resources.
    pub fn detach(&mut self) {
        let _ = self.engine.stop();
        self.was_active = false;
    }
}

impl Drop for SoundBinding {
    fn drop(&mut self) {
        self.detach();
    }
}
