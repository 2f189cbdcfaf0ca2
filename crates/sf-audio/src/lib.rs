//! sf-audio: Audio backend boundary for Soundfield
//!
//! Provides the two capability interfaces the playback pipeline consumes:
//!
//! - [`PlaybackBackend`]: an OpenAL-shaped source/buffer-queue interface,
//!   with a silent null-object implementation ([`NullBackend`]) and a real
//!   one over cpal ([`CpalBackend`]).
//! - [`DecodeBackend`]: file-to-PCM decoding, with a null-object
//!   implementation ([`NullDecodeBackend`]) and a real one over symphonia
//!   ([`SymphoniaDecoder`]).
//!
//! All PCM crossing these interfaces is interleaved 16-bit signed
//! ([`sf_core::Sample`]); decoders convert before returning.

mod backend;
mod cpal_backend;
mod decode;
mod error;
mod symphonia_decode;

pub use backend::*;
pub use cpal_backend::*;
pub use decode::*;
pub use error::*;
pub use symphonia_decode::*;
