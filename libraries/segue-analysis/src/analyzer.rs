//! Full-track analysis pipeline
//!
//! decode -> mono mix -> volume -> energy -> intro -> BPM -> outro ->
//! fingerprint, assembled into one immutable `TrackAnalysis`.

use crate::bpm::detect_bpm;
use crate::decoder::{decode_blob, mixdown_mono};
use crate::energy::analyze_energy;
use crate::fingerprint::compute_fingerprint;
use crate::intro::analyze_intro;
use crate::outro::classify_outro;
use crate::volume::analyze_volume;
use crate::Result;
use segue_core::{TrackAnalysis, FINGERPRINT_BANDS};

/// Analysis options
#[derive(Debug, Clone, Copy)]
pub struct AnalyzeOptions {
    /// Run BPM detection (the most expensive stage)
    pub analyze_bpm: bool,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self { analyze_bpm: true }
    }
}

/// Decode a byte blob and analyze it fully
pub fn analyze_blob(bytes: &[u8], opts: AnalyzeOptions) -> Result<TrackAnalysis> {
    let decoded = decode_blob(bytes)?;
    Ok(analyze_pcm(&decoded.samples, decoded.sample_rate, opts))
}

/// Analyze already-decoded interleaved stereo PCM
pub fn analyze_pcm(samples: &[f32], sample_rate: u32, opts: AnalyzeOptions) -> TrackAnalysis {
    let mono = mixdown_mono(samples);
    let duration = mono.len() as f64 / f64::from(sample_rate.max(1));

    let volume = analyze_volume(&mono);
    let energy = analyze_energy(&mono, sample_rate);
    let intro = Some(analyze_intro(&mono, sample_rate, &energy));

    let bpm = if opts.analyze_bpm {
        detect_bpm(&mono, sample_rate)
    } else {
        None
    };

    let outro = classify_outro(&mono, sample_rate, duration, &energy, bpm.as_ref());
    let fingerprint = compute_fingerprint(&mono, sample_rate);

    tracing::info!(
        duration,
        lufs = volume.estimated_lufs,
        bpm = bpm.as_ref().map(|b| b.bpm),
        outro = outro.as_ref().map(|o| o.outro_type.to_string()),
        "track analyzed"
    );

    TrackAnalysis {
        duration,
        volume,
        energy,
        bpm,
        fingerprint,
        intro,
        outro,
    }
}

/// Main-thread fallback: volume, energy, and intro only
///
/// Used when no worker is available. BPM is skipped and the fingerprint is
/// all zeros, so downstream scoring treats those dimensions as unknown.
pub fn analyze_quick(samples: &[f32], sample_rate: u32) -> TrackAnalysis {
    let mono = mixdown_mono(samples);
    let duration = mono.len() as f64 / f64::from(sample_rate.max(1));

    let volume = analyze_volume(&mono);
    let energy = analyze_energy(&mono, sample_rate);
    let intro = Some(analyze_intro(&mono, sample_rate, &energy));

    TrackAnalysis {
        duration,
        volume,
        energy,
        bpm: None,
        fingerprint: vec![0.0; FINGERPRINT_BANDS],
        intro,
        outro: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22050;

    fn stereo_track(secs: f64) -> Vec<f32> {
        let n = (secs * f64::from(SR)) as usize;
        let mut out = Vec::with_capacity(n * 2);
        let beat = SR as usize / 2;
        for i in 0..n {
            let t = i as f32 / SR as f32;
            let in_burst = i % beat < SR as usize / 8;
            let s = if in_burst {
                (2.0 * std::f32::consts::PI * 400.0 * t).sin() * 0.6
            } else {
                (2.0 * std::f32::consts::PI * 180.0 * t).sin() * 0.1
            };
            out.push(s);
            out.push(s);
        }
        out
    }

    #[test]
    fn full_analysis_populates_everything() {
        let samples = stereo_track(30.0);
        let analysis = analyze_pcm(&samples, SR, AnalyzeOptions::default());

        assert!((analysis.duration - 30.0).abs() < 0.01);
        assert!(analysis.volume.peak > 0.5);
        assert!(!analysis.energy.energy_per_second.is_empty());
        assert!(analysis.intro.is_some());
        assert!(analysis.outro.is_some());
        assert_eq!(analysis.fingerprint.len(), FINGERPRINT_BANDS);
        let bpm = analysis.bpm.expect("burst track has a pulse");
        assert!((bpm.bpm - 120.0).abs() < 4.0, "bpm {}", bpm.bpm);
    }

    #[test]
    fn bpm_can_be_disabled() {
        let samples = stereo_track(20.0);
        let analysis = analyze_pcm(&samples, SR, AnalyzeOptions { analyze_bpm: false });
        assert!(analysis.bpm.is_none());
    }

    #[test]
    fn quick_analysis_skips_heavy_stages() {
        let samples = stereo_track(20.0);
        let analysis = analyze_quick(&samples, SR);
        assert!(analysis.bpm.is_none());
        assert!(analysis.outro.is_none());
        assert!(analysis.fingerprint.iter().all(|&b| b == 0.0));
        assert!(analysis.intro.is_some());
        assert!(analysis.volume.peak > 0.5);
    }

    #[test]
    fn gain_adjustment_respects_clamps() {
        let samples = stereo_track(20.0);
        let analysis = analyze_pcm(&samples, SR, AnalyzeOptions::default());
        assert!(analysis.volume.gain_adjustment >= 0.1);
        assert!(analysis.volume.gain_adjustment <= 3.0);
    }
}
