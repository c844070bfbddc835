//! Data model for track analysis and transitions

mod analysis;
mod state;
mod transition;

pub use analysis::{
    BpmAnalysis, EnergyAnalysis, IntroAnalysis, MultibandEnergy, OutroAnalysis, OutroType,
    TrackAnalysis, VolumeAnalysis, FINGERPRINT_BANDS, HIGH_SPLIT_HZ, LOW_SPLIT_HZ,
    MULTIBAND_WINDOW_SECS,
};
pub use state::{AutoMixSnapshot, MixPhase};
pub use transition::{
    CompatibilityScore, CrossfadeParams, FadeCurveKind, ShapeOverride, SpectralCrossfadeData,
    TransitionStrategy,
};
