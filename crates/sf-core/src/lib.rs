//! sf-core: Shared types for the Soundfield audio pipeline
//!
//! This crate provides the foundational types used across all Soundfield
//! crates: the internal PCM sample format, 3D position/orientation math
//! for spatialization, and the buffering configuration surface.

mod config;
mod position;

pub use config::*;
pub use position::*;

/// Internal PCM sample format: 16-bit signed, interleaved.
///
/// Decoders convert whatever the source file stores into this format
/// before any other component sees the data.
pub type Sample = i16;

/// Scene time in seconds, as supplied by the host per tick.
pub type Seconds = f64;
