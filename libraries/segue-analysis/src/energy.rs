//! Per-second energy profile
//!
//! One RMS value per second, normalized so the loudest content second is
//! 1.0. Trailing silence is measured separately at 100 ms resolution and
//! excluded from normalization, so a long silent tail cannot flatten the
//! profile.

use segue_core::EnergyAnalysis;

/// RMS below this is treated as silence (about -50 dBFS)
const SILENCE_RMS: f32 = 0.003;

/// Trailing-silence scan window in seconds
const SILENCE_WINDOW: f64 = 0.1;

/// Analyze the per-second energy profile of a mono signal
pub fn analyze_energy(mono: &[f32], sample_rate: u32) -> EnergyAnalysis {
    let sr = sample_rate as usize;
    let duration = mono.len() as f64 / sample_rate as f64;

    if mono.is_empty() || sr == 0 {
        return EnergyAnalysis {
            energy_per_second: Vec::new(),
            outro_start_offset: 3.0,
            intro_end_offset: 0.0,
            average_energy: 0.0,
            trailing_silence: 0.0,
            is_fade_out: false,
        };
    }

    // Raw RMS per 1 s window (partial tail window included)
    let mut raw: Vec<f32> = mono
        .chunks(sr)
        .map(|w| {
            let sum: f64 = w.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
            (sum / w.len() as f64).sqrt() as f32
        })
        .collect();

    let trailing_silence = measure_trailing_silence(mono, sample_rate, duration);
    let content_end = duration - trailing_silence;

    // Windows whose start lies inside content
    let content_windows = raw
        .iter()
        .enumerate()
        .take_while(|(i, _)| (*i as f64) < content_end)
        .count();

    let max_content = raw[..content_windows]
        .iter()
        .fold(0.0f32, |m, &e| m.max(e));
    if max_content > 0.0 {
        for e in raw.iter_mut() {
            *e = (*e / max_content).min(1.0);
        }
    }

    let average_energy = if content_windows > 0 {
        raw[..content_windows].iter().sum::<f32>() / content_windows as f32
    } else {
        0.0
    };

    // Last content second still above 30% of average: where the outro begins,
    // expressed as an offset back from the end of the file
    let loud_threshold = 0.3 * average_energy;
    let last_loud_end = raw[..content_windows]
        .iter()
        .rposition(|&e| e > loud_threshold)
        .map_or(0.0, |i| ((i + 1) as f64).min(content_end));
    let outro_start_offset = (duration - last_loud_end).max(3.0).min(duration.max(3.0));

    // First second that reaches 40% of average: the intro has settled
    let intro_threshold = 0.4 * average_energy;
    let intro_end_offset = raw[..content_windows]
        .iter()
        .position(|&e| e > intro_threshold)
        .map_or(0.0, |i| (i as f64).clamp(0.0, 10.0));

    let is_fade_out = detect_fade_out(&raw[..content_windows]);

    EnergyAnalysis {
        energy_per_second: raw,
        outro_start_offset,
        intro_end_offset,
        average_energy,
        trailing_silence,
        is_fade_out,
    }
}

/// Scan 100 ms windows from the end while below the silence floor
fn measure_trailing_silence(mono: &[f32], sample_rate: u32, duration: f64) -> f64 {
    let win = ((sample_rate as f64 * SILENCE_WINDOW) as usize).max(1);
    let mut silent_windows = 0usize;
    let mut end = mono.len();
    while end > 0 {
        let start = end.saturating_sub(win);
        let slice = &mono[start..end];
        let sum: f64 = slice.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
        let rms = (sum / slice.len() as f64).sqrt() as f32;
        if rms >= SILENCE_RMS {
            break;
        }
        silent_windows += 1;
        end = start;
    }
    let silence = silent_windows as f64 * SILENCE_WINDOW;
    // Round to 0.1 s and never exceed the track
    ((silence * 10.0).round() / 10.0).min(duration)
}

/// Fade-out shape test over the last stretch of content
///
/// True when the end has dropped below 30% of the start and the midpoint
/// sits between them (monotone decline, not a cliff or a dip-and-return).
fn detect_fade_out(content: &[f32]) -> bool {
    let n = content.len();
    if n < 6 {
        return false;
    }
    let region = &content[n - n.min(10)..];
    let m = region.len();

    let mean2 = |s: &[f32]| s.iter().sum::<f32>() / s.len() as f32;
    let e_start = mean2(&region[..2]);
    let e_mid = mean2(&region[m / 2 - 1..m / 2 + 1]);
    let e_end = mean2(&region[m - 2..]);

    if e_start <= 1e-4 {
        return false;
    }
    let total_ratio = e_end / e_start;
    if total_ratio >= 0.3 {
        return false;
    }
    // Midpoint strictly between the endpoints, with each step bounded so a
    // single-second cliff does not read as a fade
    let mid_over_start = e_mid / e_start;
    let end_over_mid = if e_mid > 1e-6 { e_end / e_mid } else { 1.0 };
    mid_over_start < 0.95 && mid_over_start > 0.15 && end_over_mid < 0.95
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 8000;

    fn tone_with_env(secs: usize, env: impl Fn(f64) -> f32) -> Vec<f32> {
        (0..secs * SR as usize)
            .map(|i| {
                let t = i as f64 / f64::from(SR);
                (2.0 * std::f32::consts::PI * 220.0 * t as f32).sin() * 0.5 * env(t)
            })
            .collect()
    }

    #[test]
    fn steady_track_normalizes_to_one() {
        let mono = tone_with_env(30, |_| 1.0);
        let e = analyze_energy(&mono, SR);
        assert!(e.energy_per_second.iter().take(30).all(|&x| x > 0.95));
        assert!(e.average_energy > 0.95);
        assert!(!e.is_fade_out);
        assert!(e.trailing_silence < 0.2);
        // Loud to the very end: the 3 s floor applies
        assert!((e.outro_start_offset - 3.0).abs() < 1e-9);
    }

    #[test]
    fn trailing_silence_is_measured_and_excluded() {
        let mut mono = tone_with_env(20, |_| 1.0);
        mono.extend(std::iter::repeat(0.0).take(5 * SR as usize));
        let e = analyze_energy(&mono, SR);
        assert!((e.trailing_silence - 5.0).abs() < 0.15, "{}", e.trailing_silence);
        // Normalization ignored the silent tail
        assert!(e.energy_per_second[10] > 0.95);
        assert!(e.outro_start_offset >= 5.0);
    }

    #[test]
    fn linear_fade_is_detected() {
        let mono = tone_with_env(40, |t| {
            if t < 28.0 {
                1.0
            } else {
                (1.0 - (t - 28.0) / 12.0).max(0.02) as f32
            }
        });
        let e = analyze_energy(&mono, SR);
        assert!(e.is_fade_out);
    }

    #[test]
    fn hard_stop_is_not_a_fade() {
        let mono = tone_with_env(30, |_| 1.0);
        let e = analyze_energy(&mono, SR);
        assert!(!e.is_fade_out);
    }

    #[test]
    fn quiet_intro_pushes_intro_offset() {
        let mono = tone_with_env(40, |t| if t < 6.0 { 0.02 } else { 1.0 });
        let e = analyze_energy(&mono, SR);
        assert!(e.intro_end_offset >= 5.0 && e.intro_end_offset <= 7.0, "{}", e.intro_end_offset);
    }

    #[test]
    fn all_silence_track() {
        let mono = vec![0.0f32; 10 * SR as usize];
        let e = analyze_energy(&mono, SR);
        assert!((e.trailing_silence - 10.0).abs() < 0.15);
        assert_eq!(e.average_energy, 0.0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            /// Invariants hold for arbitrary envelopes: energies normalize
            /// into [0, 1] and trailing silence never exceeds the track
            #[test]
            fn invariants_for_random_envelopes(
                amps in prop::collection::vec(0.0f32..1.0, 10..30),
            ) {
                let mono: Vec<f32> = amps
                    .iter()
                    .flat_map(|&a| {
                        (0..SR as usize).map(move |i| {
                            (2.0 * std::f32::consts::PI * 220.0 * i as f32
                                / SR as f32)
                                .sin()
                                * 0.5
                                * a
                        })
                    })
                    .collect();
                let duration = amps.len() as f64;
                let e = analyze_energy(&mono, SR);

                prop_assert!(e.trailing_silence >= 0.0);
                prop_assert!(e.trailing_silence <= duration + 1e-9);
                let content = (duration - e.trailing_silence) as usize;
                for &energy in e.energy_per_second.iter().take(content) {
                    prop_assert!((0.0..=1.0).contains(&energy), "energy {energy}");
                }
                prop_assert!(e.intro_end_offset >= 0.0 && e.intro_end_offset <= 10.0);
                prop_assert!(e.outro_start_offset >= 3.0);
            }
        }
    }
}
