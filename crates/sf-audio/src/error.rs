//! Audio error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    /// The native audio or decode backend cannot be used at all.
    /// Callers degrade to a silent no-op rather than failing the host.
    #[error("audio backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported format: {0}")]
    FormatUnsupported(String),

    #[error("failed to open {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    /// A native call returned an error code. Fatal for the current
    /// playback session only.
    #[error("backend call failed: {0}")]
    BackendCall(String),
}

pub type AudioResult<T> = Result<T, AudioError>;
