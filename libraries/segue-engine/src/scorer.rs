//! Track-pair compatibility scoring and transition strategy
//!
//! Four sub-scores (BPM, intensity, loudness, spectral) combine into an
//! overall score; the strategy derives durations, effect flags, and curve
//! suggestions deterministically from that score.

use segue_analysis::spectral_similarity;
use segue_core::{
    CompatibilityScore, FadeCurveKind, OutroType, ShapeOverride, TrackAnalysis,
    TransitionStrategy,
};

/// Tempo ratios considered equivalent enough to mix
const BPM_RATIOS: [f32; 5] = [1.0, 2.0, 0.5, 1.5, 2.0 / 3.0];

/// Windows averaged on each side of the join (8 x 250 ms = 2 s)
const JOIN_WINDOWS: usize = 8;

/// Score how mixable two tracks are across the join
pub fn compute_compatibility(current: &TrackAnalysis, next: &TrackAnalysis) -> CompatibilityScore {
    CompatibilityScore::from_parts(
        bpm_score(current, next),
        intensity_score(current, next),
        loudness_score(current, next),
        spectral_score(current, next),
    )
}

fn bpm_score(current: &TrackAnalysis, next: &TrackAnalysis) -> f32 {
    let (Some(a), Some(b)) = (&current.bpm, &next.bpm) else {
        return 0.5;
    };
    if a.bpm <= 0.0 || b.bpm <= 0.0 {
        return 0.5;
    }
    // Best relative error over the musically useful ratios
    let best_diff = BPM_RATIOS
        .iter()
        .map(|r| ((a.bpm * r - b.bpm) / b.bpm).abs())
        .fold(f32::INFINITY, f32::min);
    if best_diff < 0.05 {
        1.0
    } else if best_diff > 0.20 {
        0.0
    } else {
        1.0 - (best_diff - 0.05) / 0.15
    }
}

fn intensity_score(current: &TrackAnalysis, next: &TrackAnalysis) -> f32 {
    let Some(outro) = &current.outro else {
        return 0.5;
    };
    let Some(intro_mb) = next.intro.as_ref().and_then(|i| i.multiband.as_ref()) else {
        return 0.5;
    };

    let out_sum: f32 = outro.multiband.tail_averages(JOIN_WINDOWS).iter().sum();
    let in_sum: f32 = intro_mb.head_averages(JOIN_WINDOWS).iter().sum();
    if out_sum <= 1e-6 || in_sum <= 1e-6 {
        return 0.5;
    }

    let octaves = (out_sum / in_sum).log2().abs();
    if octaves < 0.5 {
        1.0
    } else if octaves > 2.0 {
        0.0
    } else {
        1.0 - (octaves - 0.5) / 1.5
    }
}

fn loudness_score(current: &TrackAnalysis, next: &TrackAnalysis) -> f32 {
    let a = current.volume.estimated_lufs;
    let b = next.volume.estimated_lufs;
    // The -70 floor means "no usable measurement"
    if a <= -69.0 || b <= -69.0 {
        return 0.5;
    }
    let diff = (a - b).abs();
    if diff < 2.0 {
        1.0
    } else if diff > 8.0 {
        0.0
    } else {
        1.0 - (diff - 2.0) / 6.0
    }
}

fn spectral_score(current: &TrackAnalysis, next: &TrackAnalysis) -> f32 {
    let zero = |fp: &[f32]| fp.iter().all(|&b| b == 0.0);
    if zero(&current.fingerprint) || zero(&next.fingerprint) {
        return 0.5;
    }
    spectral_similarity(&current.fingerprint, &next.fingerprint).max(0.0)
}

/// Derive the transition plan from a score and the outro category
pub fn compute_transition_strategy(
    score: &CompatibilityScore,
    outro_type: Option<OutroType>,
) -> TransitionStrategy {
    let duration_multiplier = f64::from(0.85 + 0.45 * (1.0 - score.overall));

    let mut use_reverb_tail = matches!(
        outro_type,
        Some(OutroType::Hard | OutroType::MusicalOutro | OutroType::Sustained)
    );
    let use_noise_riser = score.overall < 0.4;
    let use_filter_sweep = score.spectral < 0.35 || score.overall < 0.3;
    let filter_sweep_intensity = (1.0 - 2.0 * score.spectral).clamp(0.0, 1.0);
    if use_filter_sweep {
        use_reverb_tail = true;
    }

    let (recommended_curve, shape_override) = if score.overall < 0.3 {
        (
            Some(FadeCurveKind::SCurve),
            Some(ShapeOverride {
                in_shape: 1.15,
                out_shape: 0.95,
            }),
        )
    } else {
        (None, None)
    };

    TransitionStrategy {
        duration_multiplier,
        use_effects: use_reverb_tail || use_noise_riser || use_filter_sweep,
        use_reverb_tail,
        use_noise_riser,
        use_filter_sweep,
        filter_sweep_intensity,
        recommended_curve,
        shape_override,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segue_core::{BpmAnalysis, EnergyAnalysis, VolumeAnalysis};

    fn analysis(bpm: Option<f32>, lufs: f32, fingerprint: Vec<f32>) -> TrackAnalysis {
        TrackAnalysis {
            duration: 200.0,
            volume: VolumeAnalysis {
                peak: 1.0,
                rms: 0.2,
                estimated_lufs: lufs,
                gain_adjustment: 1.0,
            },
            energy: EnergyAnalysis {
                energy_per_second: vec![1.0; 200],
                outro_start_offset: 5.0,
                intro_end_offset: 0.0,
                average_energy: 0.9,
                trailing_silence: 0.0,
                is_fade_out: false,
            },
            bpm: bpm.map(|b| BpmAnalysis {
                bpm: b,
                confidence: 0.9,
                beat_grid: vec![0.0, 0.5],
                analysis_offset: 0.0,
            }),
            fingerprint,
            intro: None,
            outro: None,
        }
    }

    #[test]
    fn matching_bpm_scores_one() {
        let a = analysis(Some(120.0), -14.0, vec![1.0; 24]);
        let b = analysis(Some(121.0), -14.0, vec![1.0; 24]);
        let score = compute_compatibility(&a, &b);
        assert!((score.bpm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn double_time_counts_as_matching() {
        let a = analysis(Some(70.0), -14.0, vec![1.0; 24]);
        let b = analysis(Some(140.0), -14.0, vec![1.0; 24]);
        let score = compute_compatibility(&a, &b);
        assert!((score.bpm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn distant_bpm_scores_zero() {
        let a = analysis(Some(85.0), -14.0, vec![1.0; 24]);
        let b = analysis(Some(104.0), -14.0, vec![1.0; 24]);
        let score = compute_compatibility(&a, &b);
        assert!(score.bpm < 0.3, "bpm score {}", score.bpm);
    }

    #[test]
    fn unknown_bpm_is_neutral() {
        let a = analysis(None, -14.0, vec![1.0; 24]);
        let b = analysis(Some(140.0), -14.0, vec![1.0; 24]);
        assert_eq!(compute_compatibility(&a, &b).bpm, 0.5);
    }

    #[test]
    fn loudness_difference_scales_linearly() {
        let a = analysis(None, -10.0, vec![1.0; 24]);
        let close = analysis(None, -11.0, vec![1.0; 24]);
        let mid = analysis(None, -15.0, vec![1.0; 24]);
        let far = analysis(None, -19.0, vec![1.0; 24]);
        assert_eq!(compute_compatibility(&a, &close).loudness, 1.0);
        let m = compute_compatibility(&a, &mid).loudness;
        assert!(m > 0.3 && m < 0.7, "mid loudness {m}");
        assert_eq!(compute_compatibility(&a, &far).loudness, 0.0);
    }

    #[test]
    fn zero_fingerprint_is_neutral_spectral() {
        let a = analysis(None, -14.0, vec![0.0; 24]);
        let b = analysis(None, -14.0, vec![1.0; 24]);
        assert_eq!(compute_compatibility(&a, &b).spectral, 0.5);
    }

    #[test]
    fn overall_uses_spec_weights() {
        let score = CompatibilityScore::from_parts(1.0, 1.0, 1.0, 1.0);
        assert!((score.overall - 1.0).abs() < 1e-6);
        let score = CompatibilityScore::from_parts(0.0, 1.0, 0.0, 0.0);
        assert!((score.overall - 0.30).abs() < 1e-6);
    }

    #[test]
    fn low_compatibility_turns_everything_on() {
        let score = CompatibilityScore {
            overall: 0.0,
            bpm: 0.0,
            intensity: 0.0,
            loudness: 0.0,
            spectral: 0.0,
        };
        let strategy = compute_transition_strategy(&score, Some(OutroType::FadeOut));
        assert!((strategy.duration_multiplier - 1.3).abs() < 1e-6);
        assert!(strategy.use_noise_riser);
        assert!(strategy.use_filter_sweep);
        // Filter sweep forces the reverb tail even for fade-out endings
        assert!(strategy.use_reverb_tail);
        assert!(strategy.use_effects);
        assert_eq!(strategy.recommended_curve, Some(FadeCurveKind::SCurve));
        assert_eq!(strategy.filter_sweep_intensity, 1.0);
    }

    #[test]
    fn high_compatibility_is_plain() {
        let score = CompatibilityScore {
            overall: 0.9,
            bpm: 0.9,
            intensity: 0.9,
            loudness: 0.9,
            spectral: 0.9,
        };
        let strategy = compute_transition_strategy(&score, Some(OutroType::FadeOut));
        assert!((strategy.duration_multiplier - 0.895).abs() < 1e-4);
        assert!(!strategy.use_effects);
        assert!(strategy.recommended_curve.is_none());
        assert_eq!(strategy.filter_sweep_intensity, 0.0);
    }

    #[test]
    fn reverb_tail_outros_get_reverb() {
        let score = CompatibilityScore::neutral();
        for outro in [OutroType::Hard, OutroType::MusicalOutro, OutroType::Sustained] {
            let s = compute_transition_strategy(&score, Some(outro));
            assert!(s.use_reverb_tail, "{outro}");
        }
        let s = compute_transition_strategy(&score, Some(OutroType::Silence));
        assert!(!s.use_reverb_tail);
    }

    #[test]
    fn strategy_is_pure() {
        let score = CompatibilityScore::neutral();
        let a = compute_transition_strategy(&score, Some(OutroType::Hard));
        let b = compute_transition_strategy(&score, Some(OutroType::Hard));
        assert_eq!(a, b);
    }

    #[test]
    fn scenario_three_low_compat_cold_transition() {
        // 85 vs 140 BPM (1.5x lands at 127.5, ~9% off), 9 dB apart,
        // spectral 0.2, contrasting intensity -> everything on
        let a = analysis(Some(85.0), -5.0, vec![1.0; 24]);
        let b = analysis(Some(140.0), -14.0, vec![1.0; 24]);
        let pair = compute_compatibility(&a, &b);
        assert!(pair.bpm > 0.6 && pair.bpm < 0.85, "bpm {}", pair.bpm);
        assert_eq!(pair.loudness, 0.0);

        let score = CompatibilityScore::from_parts(pair.bpm, 0.3, 0.0, 0.2);
        assert!(score.overall <= 0.3, "overall {}", score.overall);
        let strategy = compute_transition_strategy(&score, Some(OutroType::Hard));
        assert!(strategy.use_noise_riser);
        assert!(strategy.use_filter_sweep);
        assert!(strategy.use_reverb_tail);
        assert!((strategy.filter_sweep_intensity - 0.6).abs() < 1e-6);
        assert!(
            (strategy.duration_multiplier - (0.85 + 0.45 * f64::from(1.0 - score.overall))).abs()
                < 1e-6
        );
        assert_eq!(strategy.recommended_curve, Some(FadeCurveKind::SCurve));
    }
}
