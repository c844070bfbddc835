//! Error types for the audio graph

use thiserror::Error;

/// Audio graph errors
#[derive(Debug, Error)]
pub enum GraphError {
    /// Node id does not exist (or was already removed)
    #[error("No such node: {0:?}")]
    NoSuchNode(crate::context::NodeId),

    /// Operation requires a different node kind
    #[error("Wrong node kind for {0}")]
    WrongNodeKind(&'static str),

    /// Connecting these nodes would create a cycle
    #[error("Connection would create a cycle")]
    Cycle,

    /// Impulse response buffer was empty
    #[error("Empty impulse response")]
    EmptyImpulseResponse,

    /// Output stream error (desktop feature)
    #[error("Output stream error: {0}")]
    Stream(String),
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
