//! Volume and loudness estimation
//!
//! A cheap single-pass loudness estimate: RMS referenced to a -3 dB sine,
//! with the -0.691 offset aligning it roughly with K-weighted scales. The
//! gain adjustment targets -14 LUFS (streaming reference level).

use segue_core::VolumeAnalysis;

/// Loudness floor in LUFS
const LUFS_FLOOR: f32 = -70.0;

/// Normalization target in LUFS
const TARGET_LUFS: f32 = -14.0;

/// Analyze peak, RMS, estimated LUFS, and normalization gain
pub fn analyze_volume(mono: &[f32]) -> VolumeAnalysis {
    if mono.is_empty() {
        return VolumeAnalysis {
            peak: 0.0,
            rms: 0.0,
            estimated_lufs: LUFS_FLOOR,
            gain_adjustment: 1.0,
        };
    }

    let mut peak = 0.0f32;
    let mut sum_sq = 0.0f64;
    for &s in mono {
        peak = peak.max(s.abs());
        sum_sq += f64::from(s) * f64::from(s);
    }
    let rms = (sum_sq / mono.len() as f64).sqrt() as f32;

    let estimated_lufs = if rms > 0.0 {
        (20.0 * (rms / 0.707).log10() - 0.691).max(LUFS_FLOOR)
    } else {
        LUFS_FLOOR
    };

    let gain_adjustment =
        10.0f32.powf((TARGET_LUFS - estimated_lufs) / 20.0).clamp(0.1, 3.0);

    VolumeAnalysis {
        peak,
        rms,
        estimated_lufs,
        gain_adjustment,
    }
}
