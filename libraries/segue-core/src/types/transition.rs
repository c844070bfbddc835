//! Transition model: scores, strategies, and crossfade parameters

use super::analysis::OutroType;
use serde::{Deserialize, Serialize};

/// Crossfade gain-curve family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FadeCurveKind {
    /// Simple linear ramp
    ///
    /// **Note**: linear crossfades dip about 3 dB at the midpoint because
    /// they keep constant amplitude sum, not constant power. Prefer
    /// `EqualPower` for music.
    Linear,

    /// Constant perceived loudness via the sin/cos pair
    #[default]
    EqualPower,

    /// Smootherstep time-warp feeding the equal-power pair: slow start,
    /// fast middle, slow end, C2-continuous
    SCurve,
}

impl FadeCurveKind {
    /// Human-readable name for logs and UIs
    pub fn display_name(&self) -> &'static str {
        match self {
            FadeCurveKind::Linear => "Linear",
            FadeCurveKind::EqualPower => "Equal Power",
            FadeCurveKind::SCurve => "S-Curve",
        }
    }
}

/// Pairwise track compatibility, each sub-score in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityScore {
    /// Weighted average: 0.15 bpm + 0.30 intensity + 0.20 loudness + 0.35 spectral
    pub overall: f32,
    pub bpm: f32,
    pub intensity: f32,
    pub loudness: f32,
    pub spectral: f32,
}

impl CompatibilityScore {
    /// Sub-score weights for the overall average
    pub const BPM_WEIGHT: f32 = 0.15;
    pub const INTENSITY_WEIGHT: f32 = 0.30;
    pub const LOUDNESS_WEIGHT: f32 = 0.20;
    pub const SPECTRAL_WEIGHT: f32 = 0.35;

    /// Neutral score used when both tracks are unknown quantities
    pub fn neutral() -> Self {
        Self {
            overall: 0.5,
            bpm: 0.5,
            intensity: 0.5,
            loudness: 0.5,
            spectral: 0.5,
        }
    }

    /// Combine sub-scores into the weighted overall
    pub fn from_parts(bpm: f32, intensity: f32, loudness: f32, spectral: f32) -> Self {
        let overall = Self::BPM_WEIGHT * bpm
            + Self::INTENSITY_WEIGHT * intensity
            + Self::LOUDNESS_WEIGHT * loudness
            + Self::SPECTRAL_WEIGHT * spectral;
        Self {
            overall,
            bpm,
            intensity,
            loudness,
            spectral,
        }
    }
}

/// Shape-exponent override applied on top of an outro profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapeOverride {
    pub in_shape: f32,
    pub out_shape: f32,
}

/// Derived transition plan for one track pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionStrategy {
    /// Crossfade duration scale in [0.85, 1.3]
    pub duration_multiplier: f64,

    /// OR of the three effect flags below
    pub use_effects: bool,

    pub use_reverb_tail: bool,
    pub use_noise_riser: bool,
    pub use_filter_sweep: bool,

    /// Filter sweep depth in [0, 1]
    pub filter_sweep_intensity: f32,

    /// Curve suggestion for low-compatibility pairs; only applied when no
    /// strong outro detection overrides it
    pub recommended_curve: Option<FadeCurveKind>,

    /// Shape suggestion, averaged with (or substituted for) the outro profile
    pub shape_override: Option<ShapeOverride>,
}

impl Default for TransitionStrategy {
    fn default() -> Self {
        Self {
            duration_multiplier: 1.0,
            use_effects: false,
            use_reverb_tail: false,
            use_noise_riser: false,
            use_filter_sweep: false,
            filter_sweep_intensity: 0.0,
            recommended_curve: None,
            shape_override: None,
        }
    }
}

/// Per-band spectral morph plan, all values clamped to +/-6 dB
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralCrossfadeData {
    /// Target dB for the outgoing chain (ramped 0 -> target)
    pub out_target_db: [f32; 3],

    /// Initial dB for the incoming chain (ramped initial -> 0)
    pub in_initial_db: [f32; 3],

    /// Use the hold-ramp-hold bass-swap curve on the low band
    pub bass_swap_low: bool,
}

/// Fully resolved parameters for one crossfade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossfadeParams {
    /// Crossfade length in seconds
    pub duration: f64,

    /// Gain-curve family
    pub curve: FadeCurveKind,

    /// Incoming target gain (pre gain-adjustment)
    pub incoming_gain: f32,

    /// Outgoing start gain; captured from the live gain node at schedule
    /// time so the fade starts without a pre-ramp pop
    pub outgoing_gain: f32,

    /// Leave the outgoing gain untouched (fade-out endings fade themselves)
    pub fade_in_only: bool,

    /// Outro category the parameters were derived from
    pub outro_type: Option<OutroType>,

    /// Incoming shape exponent, clamped to [0.7, 1.3] by the state machine
    pub in_shape: f32,

    /// Outgoing shape exponent, clamped to [0.7, 1.3] by the state machine
    pub out_shape: f32,

    /// Loudness-normalization multiplier for the incoming track, [0.5, 2.0]
    pub incoming_gain_adjustment: f32,

    /// Spectral EQ morph, when smart curve picked one
    pub spectral_crossfade: Option<SpectralCrossfadeData>,
}

impl CrossfadeParams {
    /// Parameters for a plain time-based crossfade (tier 3: no analysis)
    pub fn basic(duration: f64, curve: FadeCurveKind) -> Self {
        Self {
            duration,
            curve,
            incoming_gain: 1.0,
            outgoing_gain: 1.0,
            fade_in_only: false,
            outro_type: None,
            in_shape: 1.0,
            out_shape: 1.0,
            incoming_gain_adjustment: 1.0,
            spectral_crossfade: None,
        }
    }
}
