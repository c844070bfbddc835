//! Segue Core
//!
//! Shared types, settings, and error handling for the Segue AutoMix engine.
//!
//! This crate defines:
//! - **Analysis model**: `TrackAnalysis` and its sub-structures (volume,
//!   energy, multiband, BPM, intro, outro)
//! - **Transition model**: compatibility scores, strategies, crossfade
//!   parameters, spectral crossfade data
//! - **Settings**: the recognized AutoMix options
//! - **Host snapshot**: the observable engine state written back to the host
//! - **Error handling**: unified `EngineError` and `Result` types
//!
//! No DSP lives here; algorithms belong to `segue-analysis` and
//! `segue-engine`.

pub mod error;
pub mod settings;
pub mod types;

pub use error::{EngineError, Result};
pub use settings::AutoMixSettings;
pub use types::{
    AutoMixSnapshot, BpmAnalysis, CompatibilityScore, CrossfadeParams, EnergyAnalysis,
    FadeCurveKind, IntroAnalysis, MixPhase, MultibandEnergy, OutroAnalysis, OutroType,
    ShapeOverride, SpectralCrossfadeData, TrackAnalysis, TransitionStrategy, VolumeAnalysis,
    FINGERPRINT_BANDS, HIGH_SPLIT_HZ, LOW_SPLIT_HZ, MULTIBAND_WINDOW_SECS,
};
