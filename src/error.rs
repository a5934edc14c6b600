//! Error taxonomy for the speech orchestration subsystem.
//!
//! Nothing here is fatal to the host process: callers degrade to a reported
//! status plus a safe idle state.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpeechError {
    /// The requested synthesis backend is not configured.
    #[error("{0} backend is not configured")]
    BackendUnavailable(&'static str),

    /// Synthesis or playback of an utterance failed.
    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    /// A playback artifact path does not exist on disk.
    #[error("audio artifact missing: {}", .0.display())]
    ArtifactMissing(PathBuf),

    /// The notification store could not be decoded with any supported
    /// encoding. Pollers treat this as "no records this cycle".
    #[error("store file could not be decoded with any supported encoding")]
    StoreDecode,

    #[error("file access error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SpeechError>;
