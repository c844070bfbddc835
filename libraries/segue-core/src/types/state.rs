//! Observable engine state written back to the host store

use super::analysis::OutroType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MixPhase {
    /// Nothing scheduled; waiting for the trigger window
    #[default]
    Idle,

    /// Current-track analysis in flight
    Analyzing,

    /// Parameters computed; pre-buffering and watching the clock
    Waiting,

    /// Crossfade scheduled or audible
    Crossfading,

    /// Crossfade complete; short hold before returning to idle
    Finishing,
}

impl fmt::Display for MixPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MixPhase::Idle => "idle",
            MixPhase::Analyzing => "analyzing",
            MixPhase::Waiting => "waiting",
            MixPhase::Crossfading => "crossfading",
            MixPhase::Finishing => "finishing",
        };
        f.write_str(name)
    }
}

/// Snapshot of engine state for the host's store
///
/// Written on every tick where something observable changed. All times are
/// seconds in the outgoing track's timeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoMixSnapshot {
    pub phase: MixPhase,
    pub outro_type: Option<OutroType>,
    pub outro_confidence: f32,
    pub crossfade_start_time: f64,
    pub crossfade_duration: f64,
    /// -1 when no crossfade is active
    pub crossfade_progress: f32,
    pub incoming_song_id: Option<String>,
    pub incoming_song_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_display() {
        assert_eq!(MixPhase::Idle.to_string(), "idle");
        assert_eq!(MixPhase::Crossfading.to_string(), "crossfading");
    }

    #[test]
    fn snapshot_serializes_round_trip() {
        let snapshot = AutoMixSnapshot {
            phase: MixPhase::Waiting,
            outro_type: Some(OutroType::FadeOut),
            outro_confidence: 0.8,
            crossfade_start_time: 192.5,
            crossfade_duration: 6.4,
            crossfade_progress: -1.0,
            incoming_song_id: Some("song-2".into()),
            incoming_song_name: Some("Next Up".into()),
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: AutoMixSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
