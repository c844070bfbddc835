//! Outro classification
//!
//! Scores all nine ending categories over the outro region's multiband
//! series, spectral flux, short-term loudness, and tail trajectory, then
//! picks the winner. `Hard` is the low-confidence fallback when nothing
//! scores decisively.
//!
//! Region convention: the outro region is the last `min(45 s, content)`
//! seconds of audible content (trailing silence excluded). All series in
//! the result start at `region_start`.

use crate::multiband::multiband_energy;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use segue_core::{BpmAnalysis, EnergyAnalysis, MultibandEnergy, OutroAnalysis, OutroType};

/// Maximum outro region length in seconds
const REGION_SECS: f64 = 45.0;

/// Minimum content needed to classify at all
const MIN_REGION_SECS: f64 = 8.0;

/// Short-term loudness window in seconds
const LOUDNESS_WINDOW: f64 = 0.4;

/// Flux (normalized) below this counts as "no onsets"
const FLUX_QUIET: f32 = 0.15;

/// Winner score below this falls back to a low-confidence `Hard`
const DECISIVE: f32 = 0.35;

/// Classify how the track ends
pub fn classify_outro(
    mono: &[f32],
    sample_rate: u32,
    duration: f64,
    energy: &EnergyAnalysis,
    bpm: Option<&BpmAnalysis>,
) -> Option<OutroAnalysis> {
    let content_end = duration - energy.trailing_silence;
    let region_len = REGION_SECS.min(content_end);
    if region_len < MIN_REGION_SECS {
        return None;
    }
    let region_start = content_end - region_len;

    let multiband = multiband_energy(mono, sample_rate, region_start, content_end);
    let spectral_flux = region_flux(mono, sample_rate, region_start, content_end);
    let short_term_loudness = region_loudness(mono, sample_rate, region_start, content_end);
    if multiband.window_count() < 8 || short_term_loudness.len() < 4 {
        return None;
    }

    let features = Features::extract(
        &multiband,
        &spectral_flux,
        &short_term_loudness,
        region_start,
        content_end,
        energy,
        bpm,
    );

    let mut scores: Vec<(OutroType, f32)> = vec![
        (OutroType::Silence, features.silence_score()),
        (OutroType::FadeOut, features.fade_out_score()),
        (OutroType::ReverbTail, features.reverb_tail_score()),
        (OutroType::Sustained, features.sustained_score()),
        (OutroType::SlowDown, features.slow_down_score()),
        (OutroType::NoiseEnd, features.noise_end_score()),
        (OutroType::LoopFade, features.loop_fade_score()),
        (OutroType::MusicalOutro, features.musical_outro_score()),
        (OutroType::Hard, features.hard_score()),
    ];
    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let (mut outro_type, mut confidence) = scores[0];
    if confidence < DECISIVE {
        outro_type = OutroType::Hard;
        confidence = 0.3;
    }
    confidence = confidence.clamp(0.0, 1.0);

    let (suggested_crossfade_start, musical_end) =
        features.timing_for(outro_type, region_start, content_end);
    let suggested_crossfade_start =
        suggested_crossfade_start.clamp(region_start, (content_end - 1.0).max(region_start));
    let musical_end_offset = (musical_end - suggested_crossfade_start).max(0.5);

    tracing::debug!(
        %outro_type,
        confidence,
        suggested_crossfade_start,
        "outro classified"
    );

    Some(OutroAnalysis {
        outro_type,
        outro_confidence: confidence,
        musical_end_offset,
        suggested_crossfade_start,
        region_start,
        multiband,
        spectral_flux,
        short_term_loudness,
        deceleration_start: features.deceleration_start,
        sustain_onset: features.sustain_onset,
        outro_section_start: features.outro_section_start,
        loop_period: features.loop_period,
    })
}

/// Everything the per-type scorers look at
///
/// Shape features (slope, drop, monotonicity, section step) are computed on
/// a 2 s smoothed copy of the loudness series; raw 400 ms values keep too
/// much beat-to-beat flutter to judge envelopes from.
struct Features {
    region_start: f64,
    content_end: f64,
    trailing_silence: f64,
    is_fade_out: bool,

    /// Normalized flux per 250 ms window, 0..1
    flux: Vec<f32>,
    /// Smoothed dB per 400 ms window
    smooth: Vec<f32>,
    /// Band sums per 250 ms window
    totals: Vec<f32>,
    /// Mean high-band share over the last 4 s
    tail_high_share: f32,

    region_mean_loud: f32,
    /// Mean smoothed loudness over the final second
    final_loud: f32,
    /// dB drop over the last 3 s
    tail_drop_db: f32,
    /// dB/s slope over the last 10 s (negative = getting quieter)
    tail_slope: f32,
    /// Fraction of non-increasing smoothed steps in the last 10 s
    tail_monotonicity: f32,

    /// Time of the last strong onset, if any
    last_onset: Option<f64>,
    sustain_onset: Option<f64>,
    deceleration_start: Option<f64>,
    outro_section_start: Option<f64>,
    /// Step size in dB at `outro_section_start`
    section_step_db: f32,
    loop_period: Option<f64>,
    loop_strength: f32,
}

impl Features {
    #[allow(clippy::too_many_lines)]
    fn extract(
        multiband: &MultibandEnergy,
        raw_flux: &[f32],
        loud: &[f32],
        region_start: f64,
        content_end: f64,
        energy: &EnergyAnalysis,
        bpm: Option<&BpmAnalysis>,
    ) -> Self {
        let max_flux = raw_flux.iter().fold(0.0f32, |m, &f| m.max(f));
        let flux: Vec<f32> = if max_flux > 0.0 {
            raw_flux.iter().map(|f| f / max_flux).collect()
        } else {
            vec![0.0; raw_flux.len()]
        };

        let windows = multiband.window_count();
        let totals: Vec<f32> = (0..windows).map(|i| multiband.total_at(i)).collect();

        let smooth = moving_average(loud, 5);
        let lw = smooth.len();
        let per_sec = 1.0 / LOUDNESS_WINDOW;
        let region_mean_loud = smooth.iter().sum::<f32>() / lw as f32;
        let final_n = (per_sec.ceil() as usize).min(lw);
        let final_loud = smooth[lw - final_n..].iter().sum::<f32>() / final_n as f32;

        let three_secs = ((3.0 * per_sec) as usize).min(lw);
        let tail_drop_db = smooth[lw - three_secs] - smooth[lw - 1];

        let ten_secs = ((10.0 * per_sec) as usize).min(lw);
        let tail = &smooth[lw - ten_secs..];
        let tail_slope = regression_slope(tail) * per_sec as f32;
        let mut down_steps = 0usize;
        for w in tail.windows(2) {
            if w[1] <= w[0] + 0.2 {
                down_steps += 1;
            }
        }
        let tail_monotonicity = if tail.len() > 1 {
            down_steps as f32 / (tail.len() - 1) as f32
        } else {
            0.0
        };

        let last_onset = flux
            .iter()
            .rposition(|&f| f > 0.35)
            .map(|i| region_start + (i as f64 + 1.0) * 0.25);

        // Sustain onset: scan back while onsets stay quiet
        let mut sustain_idx = flux.len();
        while sustain_idx > 0 && flux[sustain_idx - 1] < FLUX_QUIET + 0.05 {
            sustain_idx -= 1;
        }
        let sustain_onset = if sustain_idx < flux.len() {
            Some(region_start + sustain_idx as f64 * 0.25)
        } else {
            None
        };

        // High-band share over the last 4 s
        let tail_windows = 16.min(windows);
        let tail_avgs = multiband.tail_averages(tail_windows);
        let tail_total = tail_avgs[0] + tail_avgs[1] + tail_avgs[2];
        let tail_high_share = if tail_total > 1e-6 {
            tail_avgs[2] / tail_total
        } else {
            0.0
        };

        // Loop periodicity of the energy envelope
        let (loop_period, loop_strength) = envelope_periodicity(&totals);

        // Musical-outro step: a point where everything after is clearly
        // quieter and reasonably stable
        let mut outro_section_start = None;
        let mut section_step_db = 0.0f32;
        let min_section = (8.0 * per_sec) as usize;
        if lw > min_section + (4.0 * per_sec) as usize {
            for cut in (2.0 * per_sec) as usize..lw - min_section {
                let before = smooth[..cut].iter().sum::<f32>() / cut as f32;
                let after = &smooth[cut..];
                let after_mean = after.iter().sum::<f32>() / after.len() as f32;
                let step = before - after_mean;
                if step >= 5.0 && std_dev(after) < 4.0 && step > section_step_db {
                    section_step_db = step;
                    outro_section_start = Some(region_start + cut as f64 * LOUDNESS_WINDOW);
                }
            }
        }

        // Tempo deceleration from the beat grid
        let mut deceleration_start = None;
        if let Some(bpm) = bpm {
            let beats: Vec<f64> = bpm
                .beat_grid
                .iter()
                .map(|b| bpm.analysis_offset + b)
                .filter(|&t| t >= region_start && t <= content_end)
                .collect();
            if beats.len() >= 12 {
                let intervals: Vec<f64> = beats.windows(2).map(|w| w[1] - w[0]).collect();
                // Deceleration shows up in the final bars, not the region mean
                let tail_n = 8;
                let early = median(&intervals[..intervals.len() - tail_n]);
                let late = median(&intervals[intervals.len() - tail_n..]);
                if early > 0.0 && late / early > 1.12 {
                    let threshold = early * 1.08;
                    let idx = intervals.iter().position(|&i| i > threshold);
                    deceleration_start = idx.map(|i| beats[i]);
                }
            }
        }

        Self {
            region_start,
            content_end,
            trailing_silence: energy.trailing_silence,
            is_fade_out: energy.is_fade_out,
            flux,
            smooth,
            totals,
            tail_high_share,
            region_mean_loud,
            final_loud,
            tail_drop_db,
            tail_slope,
            tail_monotonicity,
            last_onset,
            sustain_onset,
            deceleration_start,
            outro_section_start,
            section_step_db,
            loop_period,
            loop_strength,
        }
    }

    // ===== Per-type scores =====

    fn silence_score(&self) -> f32 {
        ((self.trailing_silence as f32 - 2.0) / 6.0).clamp(0.0, 1.0)
    }

    fn fade_out_score(&self) -> f32 {
        if !self.is_fade_out {
            return 0.0;
        }
        // Long, steady decline; the energy profile already vetted the shape
        let depth = (-self.tail_slope * 10.0 / 30.0).clamp(0.0, 1.0);
        (0.5 + 0.5 * depth) * (0.4 + 0.6 * self.tail_monotonicity)
    }

    fn reverb_tail_score(&self) -> f32 {
        let Some(last_onset) = self.last_onset else {
            return 0.0;
        };
        let span = self.content_end - last_onset;
        if !(1.0..=7.0).contains(&span) {
            return 0.0;
        }
        // A decaying, onset-free tail that actually gets quiet
        let decayed = ((self.tail_drop_db - 8.0) / 15.0).clamp(0.0, 1.0);
        let span_fit = (1.0 - ((span - 3.0).abs() / 4.0) as f32).clamp(0.3, 1.0);
        (0.4 + 0.6 * decayed) * self.tail_monotonicity.max(0.3) * span_fit
    }

    fn sustained_score(&self) -> f32 {
        let Some(onset) = self.sustain_onset else {
            return 0.0;
        };
        let held = self.content_end - onset;
        if held < 2.0 {
            return 0.0;
        }
        // No onsets, but the level holds instead of decaying away
        if self.tail_drop_db.abs() > 8.0 || self.final_loud < -45.0 {
            return 0.0;
        }
        let steadiness = (1.0 - self.tail_drop_db.abs() / 8.0).clamp(0.0, 1.0);
        let length = ((held - 2.0) / 4.0).clamp(0.0, 1.0) as f32;
        0.5 + 0.5 * steadiness * length.max(0.4)
    }

    fn slow_down_score(&self) -> f32 {
        if self.deceleration_start.is_some() {
            0.75
        } else {
            0.0
        }
    }

    fn noise_end_score(&self) -> f32 {
        let tail_flux = {
            let n = 16.min(self.flux.len());
            self.flux[self.flux.len() - n..].iter().sum::<f32>() / n as f32
        };
        if self.tail_high_share < 0.35 || tail_flux < 0.2 {
            return 0.0;
        }
        (self.tail_high_share * 1.6).min(1.0) * (0.4 + 0.6 * tail_flux).min(1.0)
    }

    fn loop_fade_score(&self) -> f32 {
        if self.loop_period.is_none() {
            return 0.0;
        }
        // Periodic envelope plus an overall decline
        let n = self.totals.len();
        let q = (n / 4).max(1);
        let head: f32 = self.totals[..q].iter().sum::<f32>() / q as f32;
        let tail: f32 = self.totals[n - q..].iter().sum::<f32>() / q as f32;
        if head <= 1e-6 || tail / head > 0.8 {
            return 0.0;
        }
        self.loop_strength * (1.0 - tail / head).clamp(0.0, 1.0).mul_add(0.5, 0.5)
    }

    fn musical_outro_score(&self) -> f32 {
        let Some(start) = self.outro_section_start else {
            return 0.0;
        };
        // A real closing section is quieter but still moving
        let section_secs = self.content_end - start;
        if section_secs < 8.0 {
            return 0.0;
        }
        let active = {
            let from = ((start - self.region_start) / 0.25) as usize;
            let n = self.flux.len();
            if from >= n {
                0.0
            } else {
                self.flux[from..].iter().sum::<f32>() / (n - from) as f32
            }
        };
        if active < 0.04 {
            return 0.0;
        }
        let step = (self.section_step_db / 10.0).clamp(0.0, 1.0);
        0.45 + 0.55 * step
    }

    fn hard_score(&self) -> f32 {
        // Full level right up to the stop, onsets continuing
        let level_hold =
            (1.0 - (self.region_mean_loud - self.final_loud).max(0.0) / 8.0).clamp(0.0, 1.0);
        let tail_flux = {
            let n = 8.min(self.flux.len());
            self.flux[self.flux.len() - n..].iter().sum::<f32>() / n as f32
        };
        let active = (tail_flux / 0.3).clamp(0.2, 1.0);
        0.8 * level_hold * active
    }

    // ===== Timing =====

    /// (suggested crossfade start, end of musical content)
    fn timing_for(&self, outro_type: OutroType, region_start: f64, content_end: f64) -> (f64, f64) {
        match outro_type {
            OutroType::Hard => ((content_end - 2.5).max(region_start), content_end),
            OutroType::FadeOut => {
                // A quarter of the way into the decline
                let fade_start = self.fade_start_estimate();
                let span = content_end - fade_start;
                (fade_start + span * 0.25, content_end)
            }
            OutroType::ReverbTail => {
                let tail_start = self.last_onset.unwrap_or(content_end - 3.0);
                let span = content_end - tail_start;
                (tail_start, tail_start + span * 0.7)
            }
            OutroType::Silence => ((content_end - 2.0).max(region_start), content_end),
            OutroType::NoiseEnd => ((content_end - 3.0).max(region_start), content_end),
            OutroType::SlowDown => (
                self.deceleration_start.unwrap_or(content_end - 4.0),
                content_end,
            ),
            OutroType::Sustained => {
                let onset = self.sustain_onset.unwrap_or(content_end - 3.0);
                (onset, content_end)
            }
            OutroType::MusicalOutro => (
                self.outro_section_start.unwrap_or(content_end - 8.0),
                content_end,
            ),
            OutroType::LoopFade => {
                let period = self.loop_period.unwrap_or(2.0);
                ((content_end - 2.0 * period).max(region_start), content_end)
            }
        }
    }

    /// Where the loudness decline begins (for fade-outs): the last window
    /// still within 3 dB of the region's loudest stretch
    fn fade_start_estimate(&self) -> f64 {
        let peak = self
            .smooth
            .iter()
            .fold(f32::NEG_INFINITY, |m, &l| m.max(l));
        let idx = self
            .smooth
            .iter()
            .rposition(|&l| l > peak - 3.0)
            .unwrap_or(0);
        self.region_start + idx as f64 * LOUDNESS_WINDOW
    }
}

// ===== Series helpers =====

/// Mean positive spectral flux per 250 ms window over the region
fn region_flux(mono: &[f32], sample_rate: u32, start_sec: f64, end_sec: f64) -> Vec<f32> {
    const WIN: usize = 1024;
    const HOP: usize = 512;

    let sr = f64::from(sample_rate);
    let start = ((start_sec * sr) as usize).min(mono.len());
    let end = ((end_sec * sr) as usize).min(mono.len());
    let region = &mono[start..end];
    let bins = (((end_sec - start_sec) / 0.25).ceil() as usize).max(1);
    let mut sums = vec![0.0f32; bins];
    let mut counts = vec![0u32; bins];

    if region.len() < WIN * 2 {
        return sums;
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(WIN);
    let window: Vec<f32> = (0..WIN)
        .map(|i| {
            let x = i as f32 / (WIN - 1) as f32;
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * x).cos()
        })
        .collect();

    let frames = (region.len() - WIN) / HOP + 1;
    let mut prev = vec![0.0f32; WIN / 2];
    let mut buf = vec![Complex::new(0.0f32, 0.0f32); WIN];
    for f in 0..frames {
        let offset = f * HOP;
        for i in 0..WIN {
            buf[i] = Complex::new(region[offset + i] * window[i], 0.0);
        }
        fft.process(&mut buf);
        let mut flux = 0.0f32;
        for k in 0..WIN / 2 {
            let mag = buf[k].norm();
            let diff = mag - prev[k];
            if diff > 0.0 {
                flux += diff;
            }
            prev[k] = mag;
        }
        // First frame measures the region edge, not an onset
        if f == 0 {
            continue;
        }
        let center = (offset + WIN / 2) as f64 / sr;
        let bin = ((center / 0.25) as usize).min(bins - 1);
        sums[bin] += flux;
        counts[bin] += 1;
    }

    for (s, c) in sums.iter_mut().zip(counts.iter()) {
        if *c > 0 {
            *s /= *c as f32;
        }
    }
    sums
}

/// Short-term loudness in dB per 400 ms window over the region
fn region_loudness(mono: &[f32], sample_rate: u32, start_sec: f64, end_sec: f64) -> Vec<f32> {
    let sr = f64::from(sample_rate);
    let start = ((start_sec * sr) as usize).min(mono.len());
    let end = ((end_sec * sr) as usize).min(mono.len());
    let window = ((LOUDNESS_WINDOW * sr) as usize).max(1);

    mono[start..end]
        .chunks(window)
        .map(|w| {
            let sum: f64 = w.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
            let rms = (sum / w.len() as f64).sqrt() as f32;
            if rms > 0.0 {
                (20.0 * rms.log10()).max(-70.0)
            } else {
                -70.0
            }
        })
        .collect()
}

/// Centered moving average
fn moving_average(values: &[f32], width: usize) -> Vec<f32> {
    let n = values.len();
    let half = width / 2;
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            values[lo..hi].iter().sum::<f32>() / (hi - lo) as f32
        })
        .collect()
}

/// Strongest periodicity of the energy envelope between 1 s and 8 s
fn envelope_periodicity(totals: &[f32]) -> (Option<f64>, f32) {
    let n = totals.len();
    if n < 16 {
        return (None, 0.0);
    }
    let mean = totals.iter().sum::<f32>() / n as f32;
    let centered: Vec<f32> = totals.iter().map(|t| t - mean).collect();
    let energy: f32 = centered.iter().map(|c| c * c).sum::<f32>() / n as f32;
    if energy <= 1e-9 {
        return (None, 0.0);
    }

    let ac_norm = |lag: usize| -> f32 {
        let mut sum = 0.0f32;
        for i in 0..n - lag {
            sum += centered[i] * centered[i + lag];
        }
        sum / ((n - lag) as f32 * energy)
    };

    let mut best_lag = 0usize;
    let mut best = 0.0f32;
    for lag in 6..=32.min(n / 2) {
        let norm = ac_norm(lag);
        if norm > best {
            best = norm;
            best_lag = lag;
        }
    }

    // Any 4/4 track is periodic at the beat; a loop must correlate at its
    // multi-second lag clearly beyond that baseline (and beyond a trend,
    // which inflates every lag equally)
    let short = ac_norm(2).max(ac_norm(3));
    if best > 0.55 && best > short + 0.2 {
        (Some(best_lag as f64 * 0.25), best)
    } else {
        (None, best)
    }
}

fn regression_slope(values: &[f32]) -> f32 {
    let n = values.len() as f32;
    if n < 2.0 {
        return 0.0;
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f32>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f32 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

fn std_dev(values: &[f32]) -> f32 {
    let n = values.len() as f32;
    if n < 2.0 {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / n;
    (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n).sqrt()
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted[sorted.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::analyze_energy;

    const SR: u32 = 22050;

    /// Drum-like bursts every 0.5 s over a quiet pad, shaped by `env`
    fn bursts(secs: f64, env: impl Fn(f64) -> f32) -> Vec<f32> {
        let n = (secs * f64::from(SR)) as usize;
        let mut out: Vec<f32> = (0..n)
            .map(|i| {
                let t = i as f64 / f64::from(SR);
                (2.0 * std::f32::consts::PI * 180.0 * t as f32).sin() * 0.12 * env(t)
            })
            .collect();
        let beat = SR as usize / 2;
        let mut pos = 0;
        while pos < n {
            for i in 0..(SR as usize / 8).min(n - pos) {
                let t = i as f32 / SR as f32;
                let global_t = (pos + i) as f64 / f64::from(SR);
                out[pos + i] += (2.0 * std::f32::consts::PI * 500.0 * t).sin()
                    * (-t * 30.0).exp()
                    * 0.8
                    * env(global_t);
            }
            pos += beat;
        }
        out
    }

    fn classify(mono: &[f32]) -> OutroAnalysis {
        let duration = mono.len() as f64 / f64::from(SR);
        let energy = analyze_energy(mono, SR);
        classify_outro(mono, SR, duration, &energy, None).expect("region long enough")
    }

    #[test]
    fn steady_bursts_to_the_end_read_as_hard() {
        let outro = classify(&bursts(40.0, |_| 1.0));
        assert_eq!(outro.outro_type, OutroType::Hard);
        assert!(outro.outro_confidence > 0.25);
        // Suggested start sits close to the end
        assert!(outro.suggested_crossfade_start > 30.0);
    }

    #[test]
    fn long_decline_reads_as_fade_out() {
        let mono = bursts(40.0, |t| {
            if t < 26.0 {
                1.0
            } else {
                (1.0 - (t - 26.0) / 14.0).max(0.01) as f32
            }
        });
        let outro = classify(&mono);
        assert_eq!(outro.outro_type, OutroType::FadeOut);
        assert!(outro.outro_confidence >= 0.35);
    }

    #[test]
    fn long_trailing_silence_reads_as_silence() {
        let mut mono = bursts(30.0, |_| 1.0);
        mono.extend(std::iter::repeat(0.0).take(8 * SR as usize));
        let outro = classify(&mono);
        assert_eq!(outro.outro_type, OutroType::Silence);
    }

    #[test]
    fn held_tone_ending_reads_as_sustained() {
        let mut mono = bursts(32.0, |_| 1.0);
        // 6 s held chord at a steady level
        let held: Vec<f32> = (0..6 * SR as usize)
            .map(|i| {
                let t = i as f32 / SR as f32;
                ((2.0 * std::f32::consts::PI * 220.0 * t).sin()
                    + (2.0 * std::f32::consts::PI * 330.0 * t).sin())
                    * 0.3
            })
            .collect();
        mono.extend(held);
        let outro = classify(&mono);
        assert_eq!(outro.outro_type, OutroType::Sustained);
        assert!(outro.sustain_onset.is_some());
    }

    #[test]
    fn decaying_tail_reads_as_reverb_tail() {
        let mut mono = bursts(34.0, |_| 1.0);
        // 4 s exponential decay of a chord, like a final hit ringing out
        let tail: Vec<f32> = (0..4 * SR as usize)
            .map(|i| {
                let t = i as f32 / SR as f32;
                ((2.0 * std::f32::consts::PI * 220.0 * t).sin()
                    + (2.0 * std::f32::consts::PI * 277.0 * t).sin())
                    * 0.4
                    * (-t * 1.2).exp()
            })
            .collect();
        mono.extend(tail);
        let outro = classify(&mono);
        assert_eq!(outro.outro_type, OutroType::ReverbTail);
        assert!(outro.musical_end_offset > 0.5);
    }

    #[test]
    fn quieter_final_section_reads_as_musical_outro() {
        let mono = bursts(45.0, |t| if t < 30.0 { 1.0 } else { 0.22 });
        let outro = classify(&mono);
        assert_eq!(outro.outro_type, OutroType::MusicalOutro);
        let start = outro.outro_section_start.expect("section start");
        assert!((start - 30.0).abs() < 3.0, "section start {start}");
    }

    #[test]
    fn noisy_tail_reads_as_noise_end() {
        let mut mono = bursts(32.0, |_| 1.0);
        // 4 s of deterministic pseudo-noise (applause-like)
        let mut state = 0x2545_f491u32;
        let noise: Vec<f32> = (0..4 * SR as usize)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state as f32 / u32::MAX as f32 - 0.5) * 0.6
            })
            .collect();
        mono.extend(noise);
        let outro = classify(&mono);
        assert_eq!(outro.outro_type, OutroType::NoiseEnd);
    }

    #[test]
    fn decelerating_grid_reads_as_slow_down() {
        let mono = bursts(40.0, |_| 1.0);
        let duration = mono.len() as f64 / f64::from(SR);
        let energy = analyze_energy(&mono, SR);
        // Beat grid that stretches from 0.5 s to 0.8 s intervals at the end
        let mut grid = Vec::new();
        let mut t = 0.0;
        let mut interval = 0.5;
        while t < 40.0 {
            grid.push(t);
            if t > 32.0 {
                interval *= 1.05;
            }
            t += interval;
        }
        let bpm = segue_core::BpmAnalysis {
            bpm: 120.0,
            confidence: 0.9,
            beat_grid: grid,
            analysis_offset: 0.0,
        };
        let outro = classify_outro(&mono, SR, duration, &energy, Some(&bpm)).unwrap();
        assert_eq!(outro.outro_type, OutroType::SlowDown);
        let decel = outro.deceleration_start.expect("deceleration start");
        assert!(decel > 30.0 && decel < 38.0, "deceleration at {decel}");
    }

    #[test]
    fn envelope_periodicity_finds_loop_length() {
        // 2 s loop = period 8 windows of 250 ms
        let totals: Vec<f32> = (0..120)
            .map(|i| 1.0 + 0.5 * ((i % 8) as f32 / 8.0 * std::f32::consts::TAU).sin())
            .collect();
        let (period, strength) = envelope_periodicity(&totals);
        assert_eq!(period, Some(2.0));
        assert!(strength > 0.55);
    }

    #[test]
    fn aperiodic_envelope_has_no_loop() {
        let totals: Vec<f32> = (0..120).map(|i| 1.0 + (i as f32 * 0.013).sin() * 0.01).collect();
        let (period, _) = envelope_periodicity(&totals);
        assert!(period.is_none());
    }

    #[test]
    fn suggested_start_is_before_content_end() {
        for mono in [
            bursts(40.0, |_| 1.0),
            bursts(40.0, |t| if t < 28.0 { 1.0 } else { 0.2 }),
        ] {
            let outro = classify(&mono);
            let duration = mono.len() as f64 / f64::from(SR);
            assert!(outro.suggested_crossfade_start <= duration - 1.0 + 1e-6);
            assert!(outro.outro_confidence >= 0.0 && outro.outro_confidence <= 1.0);
        }
    }

    #[test]
    fn short_content_yields_none() {
        let mono = bursts(5.0, |_| 1.0);
        let energy = analyze_energy(&mono, SR);
        assert!(classify_outro(&mono, SR, 5.0, &energy, None).is_none());
    }
}
