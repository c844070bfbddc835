//! Per-track acoustic analysis model
//!
//! `TrackAnalysis` is immutable once produced: the analyzer builds it in a
//! background worker, the cache stores it by song id, and the state machine
//! only ever reads it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bands in the spectral fingerprint
pub const FINGERPRINT_BANDS: usize = 24;

/// Multiband window length in seconds
pub const MULTIBAND_WINDOW_SECS: f64 = 0.25;

/// Low/mid band split frequency in Hz
pub const LOW_SPLIT_HZ: f32 = 300.0;

/// Mid/high band split frequency in Hz
pub const HIGH_SPLIT_HZ: f32 = 4000.0;

/// Complete acoustic analysis of one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackAnalysis {
    /// Track duration in seconds
    pub duration: f64,

    /// Loudness and normalization data
    pub volume: VolumeAnalysis,

    /// Per-second energy and structural offsets
    pub energy: EnergyAnalysis,

    /// Tempo data, when BPM analysis ran and found a stable pulse
    pub bpm: Option<BpmAnalysis>,

    /// 24 non-negative band energies, cosine-similarity comparable
    pub fingerprint: Vec<f32>,

    /// Intro character (quiet start, energy build)
    pub intro: Option<IntroAnalysis>,

    /// Ending classification and outro time series
    pub outro: Option<OutroAnalysis>,
}

impl TrackAnalysis {
    /// End of audible content: duration minus trailing silence
    pub fn effective_end(&self) -> f64 {
        (self.duration - self.energy.trailing_silence).max(0.0)
    }
}

/// Volume / loudness measurements
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeAnalysis {
    /// Absolute sample peak (0.0 to 1.0)
    pub peak: f32,

    /// Root-mean-square amplitude over the whole track
    pub rms: f32,

    /// Estimated loudness in LUFS (floor -70)
    pub estimated_lufs: f32,

    /// Linear gain multiplier targeting -14 LUFS, clamped to [0.1, 3.0]
    /// (the state machine applies a tighter [0.5, 2.0] clamp at use time)
    pub gain_adjustment: f32,
}

impl fmt::Display for VolumeAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "peak {:.3}, rms {:.3}, {:.1} LUFS, gain x{:.2}",
            self.peak, self.rms, self.estimated_lufs, self.gain_adjustment
        )
    }
}

/// Per-second energy profile and the structural offsets derived from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyAnalysis {
    /// RMS per 1-second window, normalized so the max over content
    /// (excluding trailing silence) is 1.0
    pub energy_per_second: Vec<f32>,

    /// Seconds from track start where the outro region begins
    pub outro_start_offset: f64,

    /// Seconds from track start where the intro settles, clamped to [0, 10]
    pub intro_end_offset: f64,

    /// Mean normalized energy over content seconds
    pub average_energy: f32,

    /// Length of trailing silence in seconds, 0.1 s resolution
    pub trailing_silence: f64,

    /// Whether the outro region looks like a mastered fade-out
    pub is_fade_out: bool,
}

/// Tempo estimate plus beat grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BpmAnalysis {
    /// Estimated tempo in beats per minute
    pub bpm: f32,

    /// Detection confidence in [0, 1]
    pub confidence: f32,

    /// Beat timestamps in seconds, relative to `analysis_offset`
    pub beat_grid: Vec<f64>,

    /// Track time where the analyzed window starts
    pub analysis_offset: f64,
}

/// Intro character of a track (consumed when it is the incoming side)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntroAnalysis {
    /// Seconds of near-silent lead-in
    pub quiet_intro_duration: f64,

    /// Seconds until the intro reaches steady energy
    pub energy_build_duration: f64,

    /// Intro energy relative to track average, in [0, ~2]
    pub intro_energy_ratio: f32,

    /// Multiband series over the intro region, when computed
    pub multiband: Option<MultibandEnergy>,
}

/// Categorical classification of how a track ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutroType {
    /// Full energy up to an abrupt stop
    Hard,

    /// Mastered fade-out: long monotonic level decline
    FadeOut,

    /// Final note/chord decaying into reverberant space
    ReverbTail,

    /// Ends in recorded silence well before the file does
    Silence,

    /// Noise, applause, or texture without pitch structure
    NoiseEnd,

    /// Tempo decelerates into the ending
    SlowDown,

    /// A held sustained tone or pad closes the track
    Sustained,

    /// A distinct quieter musical section closes the track
    MusicalOutro,

    /// A repeating loop that fades or cuts
    LoopFade,
}

impl fmt::Display for OutroType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutroType::Hard => "hard",
            OutroType::FadeOut => "fade-out",
            OutroType::ReverbTail => "reverb-tail",
            OutroType::Silence => "silence",
            OutroType::NoiseEnd => "noise-end",
            OutroType::SlowDown => "slow-down",
            OutroType::Sustained => "sustained",
            OutroType::MusicalOutro => "musical-outro",
            OutroType::LoopFade => "loop-fade",
        };
        f.write_str(name)
    }
}

/// Outro classification plus the time series it was derived from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutroAnalysis {
    /// Winning ending category
    pub outro_type: OutroType,

    /// Classification confidence in [0, 1]
    pub outro_confidence: f32,

    /// Seconds of musical content remaining after `suggested_crossfade_start`
    pub musical_end_offset: f64,

    /// Recommended crossfade start, seconds from track start
    pub suggested_crossfade_start: f64,

    /// Track time where the outro region (and its multiband series) begins
    pub region_start: f64,

    /// 250 ms multiband energy over the outro region
    pub multiband: MultibandEnergy,

    /// Spectral flux per multiband window (onset density proxy)
    pub spectral_flux: Vec<f32>,

    /// 400 ms short-term loudness over the outro region, in dB
    pub short_term_loudness: Vec<f32>,

    /// Track time where tempo deceleration starts (slow-down outros)
    pub deceleration_start: Option<f64>,

    /// Track time where a sustained tone begins (sustained outros)
    pub sustain_onset: Option<f64>,

    /// Track time where a distinct closing section begins (musical outros)
    pub outro_section_start: Option<f64>,

    /// Detected loop period in seconds (loop-fade outros)
    pub loop_period: Option<f64>,
}

/// Per-window band energies: low (<=300 Hz), mid (300 Hz - 4 kHz),
/// high (>4 kHz), in 250 ms windows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultibandEnergy {
    pub low: Vec<f32>,
    pub mid: Vec<f32>,
    pub high: Vec<f32>,
}

impl MultibandEnergy {
    /// Number of windows in the series
    pub fn window_count(&self) -> usize {
        self.low.len().min(self.mid.len()).min(self.high.len())
    }

    /// Sum of the three bands at one window
    pub fn total_at(&self, idx: usize) -> f32 {
        self.low.get(idx).copied().unwrap_or(0.0)
            + self.mid.get(idx).copied().unwrap_or(0.0)
            + self.high.get(idx).copied().unwrap_or(0.0)
    }

    /// Per-band means over a window range (clamped to the series length)
    pub fn band_averages(&self, start: usize, end: usize) -> [f32; 3] {
        let count = self.window_count();
        let start = start.min(count);
        let end = end.min(count);
        if start >= end {
            return [0.0; 3];
        }
        let n = (end - start) as f32;
        let mean = |v: &[f32]| v[start..end].iter().sum::<f32>() / n;
        [mean(&self.low), mean(&self.mid), mean(&self.high)]
    }

    /// Per-band means over the last `n` windows
    pub fn tail_averages(&self, n: usize) -> [f32; 3] {
        let count = self.window_count();
        self.band_averages(count.saturating_sub(n), count)
    }

    /// Per-band means over the first `n` windows
    pub fn head_averages(&self, n: usize) -> [f32; 3] {
        self.band_averages(0, n)
    }

    /// Window index for a time offset from the region start
    pub fn window_index(offset_secs: f64) -> usize {
        if offset_secs <= 0.0 {
            return 0;
        }
        (offset_secs / MULTIBAND_WINDOW_SECS) as usize
    }
}
