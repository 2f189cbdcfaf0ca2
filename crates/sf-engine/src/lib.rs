//! sf-engine: The Soundfield playback pipeline
//!
//! Wires an audio-clip source to a native playback backend:
//!
//! ```text
//! ┌──────────────┐     ┌────────────┐     ┌────────────┐     ┌─────────────┐
//! │ SoundBinding │────▶│ ClipSource │────▶│ BufferRing │────▶│  Playback   │
//! │  (scene)     │     │ (decode,   │     │ (native    │     │  backend    │
//! │              │     │  playlist) │     │  buffers)  │     │             │
//! └──────────────┘     └────────────┘     └────────────┘     └─────────────┘
//!                            ▲ fill cycle (worker thread or poll)
//! ```
//!
//! The scene graph talks to [`SoundBinding`]: field changes, a per-frame
//! render tick with listener geometry, and teardown. Everything else is
//! internal to [`PlaybackEngine`] and its fill worker.

mod binding;
mod buffer_ring;
mod clip;
mod engine;
mod playlist;
mod scheduler;
mod spatial;

pub use binding::*;
pub use buffer_ring::*;
pub use clip::*;
pub use engine::*;
pub use playlist::*;
pub use scheduler::*;
pub use spatial::*;
