//! Buffering configuration
//!
//! Provides:
//! - Per-engine buffering settings (buffer length, pool size, poll interval)
//! - A process-wide default instance behind its own lock

use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Buffering and scheduling settings for one playback engine.
///
/// Settings are fixed for the lifetime of a playback session; to change
/// them, stop the engine first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Length of one native buffer, in frames.
    pub buffer_frames: usize,
    /// Number of native buffers in the pool.
    pub num_buffers: usize,
    /// Interval between fill cycles of the worker.
    pub poll_interval: Duration,
    /// Silence inserted between consecutive playlist tracks.
    pub pause_between_tracks: Duration,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            // 100 ms of audio per buffer at 44.1 kHz
            buffer_frames: 4410,
            num_buffers: 5,
            poll_interval: Duration::from_millis(100),
            pause_between_tracks: Duration::from_secs(2),
        }
    }
}

impl AudioSettings {
    /// Total frames of audio the buffer pool can hold.
    pub fn pool_frames(&self) -> usize {
        self.buffer_frames * self.num_buffers
    }

    /// Whether the pool holds enough audio to survive two poll intervals
    /// at the given sample rate. Engines refuse weaker configurations.
    pub fn covers_poll_interval(&self, sample_rate: u32) -> bool {
        let pool = Duration::from_secs_f64(self.pool_frames() as f64 / sample_rate as f64);
        pool >= self.poll_interval * 2
    }

    /// Snapshot of the process-wide defaults.
    pub fn process_default() -> Self {
        PROCESS_DEFAULT.read().clone()
    }

    /// Replace the process-wide defaults used by engines constructed
    /// without explicit settings.
    pub fn set_process_default(settings: Self) {
        *PROCESS_DEFAULT.write() = settings;
    }
}

static PROCESS_DEFAULT: RwLock<AudioSettings> = RwLock::new(AudioSettings {
    buffer_frames: 4410,
    num_buffers: 5,
    poll_interval: Duration::from_millis(100),
    pause_between_tracks: Duration::from_secs(2),
});
