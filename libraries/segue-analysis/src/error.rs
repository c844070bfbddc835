//! Error types for track analysis

use thiserror::Error;

/// Analysis errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Container probe failed
    #[error("Failed to probe media: {0}")]
    Probe(String),

    /// No decodable audio track in the container
    #[error("No audio tracks found")]
    NoAudioTrack,

    /// Decoder construction or packet decode failed
    #[error("Decode error: {0}")]
    Decode(String),

    /// Decoded stream was empty
    #[error("Decoded stream contained no samples")]
    EmptyStream,

    /// The analysis worker is gone
    #[error("Analysis worker disconnected")]
    WorkerGone,
}

/// Result type for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;
