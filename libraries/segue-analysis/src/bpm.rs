//! BPM detection and beat grid
//!
//! Onset novelty (positive spectral flux) over the last stretch of the
//! track, autocorrelated over the 60-180 BPM lag range with harmonic
//! folding. The beat grid comes from a phase search over the dominant
//! period, refined to local novelty peaks. Confidence is the peak-to-median
//! ratio of the tempogram, squashed into [0, 1].

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use segue_core::BpmAnalysis;

const NOVELTY_WIN: usize = 1024;
const NOVELTY_HOP: usize = 512;
const MIN_BPM: f64 = 60.0;
const MAX_BPM: f64 = 180.0;

/// Only the tail of the track is analyzed; beat alignment happens near the
/// outro, and a stable grid there is what matters
const TAIL_WINDOW_SECS: f64 = 90.0;

/// Minimum track length to attempt detection
const MIN_TRACK_SECS: f64 = 8.0;

/// Detect tempo and a beat grid over the track's tail window
pub fn detect_bpm(mono: &[f32], sample_rate: u32) -> Option<BpmAnalysis> {
    let sr = f64::from(sample_rate);
    if sr <= 0.0 || (mono.len() as f64) < MIN_TRACK_SECS * sr {
        return None;
    }

    let tail_frames = (TAIL_WINDOW_SECS * sr) as usize;
    let start = mono.len().saturating_sub(tail_frames);
    let analysis_offset = start as f64 / sr;
    let tail = &mono[start..];

    let novelty = onset_novelty(tail, sample_rate)?;
    let fps = sr / NOVELTY_HOP as f64;

    let lag_min = ((60.0 / MAX_BPM) * fps).floor().max(2.0) as usize;
    let lag_max = ((60.0 / MIN_BPM) * fps).ceil() as usize;
    if lag_max + 3 >= novelty.len() || lag_min >= lag_max {
        return None;
    }

    // Autocorrelation over the tempo lag range only
    let ac = autocorrelation(&novelty, lag_max * 3 + 2);

    // Tempogram with harmonic folding: a true beat period is supported by
    // its multiples
    let mut scores = vec![0.0f64; lag_max + 1];
    for lag in lag_min..=lag_max {
        let mut s = ac[lag];
        if 2 * lag < ac.len() {
            s += 0.5 * ac[2 * lag];
        }
        if 3 * lag < ac.len() {
            s += 0.33 * ac[3 * lag];
        }
        scores[lag] = s;
    }

    let best_lag = (lag_min..=lag_max).max_by(|a, b| {
        scores[*a]
            .partial_cmp(&scores[*b])
            .unwrap_or(std::cmp::Ordering::Equal)
    })?;
    let peak = scores[best_lag];
    // A real pulse shows up as a healthy fraction of the zero-lag energy;
    // anything below this is decoration on noise
    if peak <= 0.0 || ac[best_lag] < 0.05 * ac[0] {
        return None;
    }

    // Parabolic refinement of the peak lag
    let refined_lag = if best_lag > lag_min && best_lag < lag_max {
        let left = scores[best_lag - 1];
        let right = scores[best_lag + 1];
        let denom = left - 2.0 * peak + right;
        if denom.abs() > 1e-12 {
            best_lag as f64 + 0.5 * (left - right) / denom
        } else {
            best_lag as f64
        }
    } else {
        best_lag as f64
    };

    let bpm = (60.0 * fps / refined_lag) as f32;

    // Peak-to-median ratio over the searched range
    let mut in_range: Vec<f64> = scores[lag_min..=lag_max].to_vec();
    in_range.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = in_range[in_range.len() / 2].max(1e-12);
    let ratio = peak / median;
    let confidence = (((ratio - 1.0) / 4.0).clamp(0.0, 1.0)) as f32;

    let beat_grid = track_beats(&novelty, refined_lag, fps);
    if beat_grid.is_empty() {
        return None;
    }

    tracing::debug!(bpm, confidence, beats = beat_grid.len(), "bpm detected");

    Some(BpmAnalysis {
        bpm,
        confidence,
        beat_grid,
        analysis_offset,
    })
}

/// Positive spectral flux per hop, detrended and half-wave rectified.
/// Returns None when the signal carries no onset structure at all.
fn onset_novelty(signal: &[f32], sample_rate: u32) -> Option<Vec<f64>> {
    if signal.len() < NOVELTY_WIN * 2 {
        return None;
    }
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(NOVELTY_WIN);

    let window: Vec<f32> = (0..NOVELTY_WIN)
        .map(|i| {
            let x = i as f32 / (NOVELTY_WIN - 1) as f32;
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * x).cos()
        })
        .collect();

    let frames = (signal.len() - NOVELTY_WIN) / NOVELTY_HOP + 1;
    let mut prev_mag = vec![0.0f64; NOVELTY_WIN / 2];
    let mut novelty = Vec::with_capacity(frames);
    let mut buf = vec![Complex::new(0.0f32, 0.0f32); NOVELTY_WIN];

    for f in 0..frames {
        let start = f * NOVELTY_HOP;
        for i in 0..NOVELTY_WIN {
            buf[i] = Complex::new(signal[start + i] * window[i], 0.0);
        }
        fft.process(&mut buf);

        let mut flux = 0.0f64;
        for k in 0..NOVELTY_WIN / 2 {
            let mag = f64::from(buf[k].norm());
            let diff = mag - prev_mag[k];
            if diff > 0.0 {
                flux += diff;
            }
            prev_mag[k] = mag;
        }
        novelty.push(flux);
    }

    // Detrend against a ~1 s moving average, then half-wave rectify
    let fps = f64::from(sample_rate) / NOVELTY_HOP as f64;
    let half = (fps / 2.0) as usize;
    let detrended: Vec<f64> = (0..novelty.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(novelty.len());
            let mean = novelty[lo..hi].iter().sum::<f64>() / (hi - lo) as f64;
            (novelty[i] - mean).max(0.0)
        })
        .collect();

    let total: f64 = detrended.iter().sum();
    if total <= 1e-9 {
        return None;
    }
    Some(detrended)
}

/// Direct autocorrelation, mean-normalized per lag
fn autocorrelation(novelty: &[f64], max_lag: usize) -> Vec<f64> {
    let n = novelty.len();
    let max_lag = max_lag.min(n.saturating_sub(1));
    let mut ac = vec![0.0f64; max_lag + 1];
    for (lag, slot) in ac.iter_mut().enumerate() {
        let mut sum = 0.0;
        for i in 0..n - lag {
            sum += novelty[i] * novelty[i + lag];
        }
        *slot = sum / (n - lag) as f64;
    }
    ac
}

/// Beat positions (seconds, relative to the analyzed window) by phase
/// search over the dominant period plus local-peak refinement
fn track_beats(novelty: &[f64], period: f64, fps: f64) -> Vec<f64> {
    let n = novelty.len();
    if period < 2.0 || n < period as usize * 2 {
        return Vec::new();
    }

    // Coarse phase search: which offset lines beats up with novelty energy
    let period_i = period.round() as usize;
    let mut best_phase = 0usize;
    let mut best_strength = -1.0f64;
    for phase in 0..period_i {
        let mut strength = 0.0;
        let mut idx = phase as f64;
        while (idx as usize) < n {
            strength += novelty[idx as usize];
            idx += period;
        }
        if strength > best_strength {
            best_strength = strength;
            best_phase = phase;
        }
    }

    // Walk the grid, snapping each beat to a nearby novelty peak
    let search = (period / 8.0).max(1.0) as usize;
    let mean = novelty.iter().sum::<f64>() / n as f64;
    let mut beats = Vec::new();
    let mut expected = best_phase as f64;
    while (expected as usize) < n {
        let center = expected as usize;
        let lo = center.saturating_sub(search);
        let hi = (center + search + 1).min(n);
        let local_peak = (lo..hi).max_by(|a, b| {
            novelty[*a]
                .partial_cmp(&novelty[*b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let frame = match local_peak {
            Some(p) if novelty[p] > mean * 1.5 => p as f64,
            _ => expected,
        };
        beats.push(frame / fps);
        expected += period;
    }
    beats
}

/// Nearest beat to `target` (track time), or `target` when the grid is empty
pub fn find_nearest_beat(beat_grid: &[f64], target: f64, analysis_offset: f64) -> f64 {
    let mut best = target;
    let mut best_dist = f64::INFINITY;
    for &beat in beat_grid {
        let t = analysis_offset + beat;
        let dist = (t - target).abs();
        if dist < best_dist {
            best_dist = dist;
            best = t;
        }
    }
    best
}
