//! Error types for the AutoMix engine

use thiserror::Error;

/// Engine errors
///
/// Every kind here is an expected, recoverable condition: the state machine
/// catches them at its promise boundaries and converges back to idle. None
/// of them should ever escape `monitor_playback`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// URL lookup returned nothing or failed
    #[error("URL resolution failed for song {0}")]
    Resolve(String),

    /// Download of the next track failed
    #[error("Download failed: {0}")]
    Fetch(String),

    /// Decoder could not produce PCM from the downloaded bytes
    #[error("Decode failed: {0}")]
    Decode(String),

    /// An operation exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(&'static str),

    /// A required audio-graph node was missing or could not be created
    #[error("Audio graph setup failed: {0}")]
    GraphSetup(String),

    /// A suspension point woke into an unexpected state
    #[error("Inconsistent state: {0}")]
    InconsistentState(&'static str),

    /// The playlist has no candidate next track
    #[error("No next track available")]
    NoNextTrack,

    /// Track analysis failed
    #[error("Analysis failed: {0}")]
    Analysis(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
