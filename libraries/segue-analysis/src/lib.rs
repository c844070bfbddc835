//! Segue Analysis
//!
//! Offline per-track acoustic analysis for the AutoMix engine:
//!
//! - Decode (Symphonia) and mono mixdown
//! - Volume / estimated LUFS and normalization gain
//! - Per-second energy, trailing silence, fade-out detection
//! - Multiband (300 Hz / 4 kHz) energy time series
//! - 24-band spectral fingerprint with cosine similarity
//! - BPM estimate and beat grid
//! - Outro classification and intro character
//!
//! Heavy work runs on a single background worker thread
//! (`AnalysisWorker`); results land in an insertion-ordered FIFO cache
//! (`AnalysisCache`) keyed by song id.

pub mod analyzer;
pub mod bpm;
pub mod cache;
pub mod decoder;
pub mod energy;
mod error;
pub mod filters;
pub mod fingerprint;
pub mod intro;
pub mod multiband;
pub mod outro;
pub mod volume;
pub mod worker;

pub use analyzer::{analyze_blob, analyze_pcm, analyze_quick, AnalyzeOptions};
pub use bpm::{detect_bpm, find_nearest_beat};
pub use cache::{AnalysisCache, CACHE_CAPACITY};
pub use decoder::{decode_blob, mixdown_mono, DecodedAudio};
pub use error::{AnalysisError, Result};
pub use fingerprint::{compute_fingerprint, spectral_similarity};
pub use worker::{AnalysisOutcome, AnalysisWorker};
