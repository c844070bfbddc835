//! AutoMix settings
//!
//! The nine recognized options, in the shape the host's settings layer
//! persists them. Everything else about a transition is derived.

use crate::types::FadeCurveKind;
use serde::{Deserialize, Serialize};

/// User-facing AutoMix options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoMixSettings {
    /// Master on/off
    pub enabled: bool,

    /// Desired crossfade length in seconds (clamped per track at use time)
    pub crossfade_duration: f64,

    /// Default curve when no smarter choice applies
    pub transition_style: FadeCurveKind,

    /// Run BPM analysis at all
    pub bpm_match: bool,

    /// Snap the crossfade start to the nearest beat
    pub beat_align: bool,

    /// Apply LUFS-based gain adjustment to the incoming track
    pub volume_norm: bool,

    /// Pick per-outro-type curve profiles and enable spectral EQ
    pub smart_curve: bool,

    /// Instantiate reverb / noise-riser / filter-sweep effects
    pub transition_effects: bool,

    /// Defer the crossfade start over vocal phrases
    pub vocal_guard: bool,
}

impl Default for AutoMixSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            crossfade_duration: 8.0,
            transition_style: FadeCurveKind::EqualPower,
            bpm_match: true,
            beat_align: true,
            volume_norm: true,
            smart_curve: true,
            transition_effects: true,
            vocal_guard: true,
        }
    }
}

impl AutoMixSettings {
    /// Crossfade duration clamped to [2 s, songDuration/4]
    ///
    /// The 2 s floor applies last: even a song shorter than 8 s still gets
    /// a 2 s crossfade.
    pub fn effective_crossfade_duration(&self, song_duration: f64) -> f64 {
        self.crossfade_duration.min(song_duration / 4.0).max(2.0)
    }
}
