//! Spectral fingerprint
//!
//! 24 log-spaced band energies sampled across the whole track, L2
//! normalized. Two tracks sound alike iff the cosine similarity of their
//! fingerprints is near 1.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use segue_core::FINGERPRINT_BANDS;

/// FFT frame size for fingerprinting
const FRAME_SIZE: usize = 2048;

/// Maximum number of frames sampled across the track
const MAX_FRAMES: usize = 64;

/// Lowest band edge in Hz
const MIN_FREQ: f32 = 40.0;

/// Compute the 24-band fingerprint of a mono signal
pub fn compute_fingerprint(mono: &[f32], sample_rate: u32) -> Vec<f32> {
    let mut bands = vec![0.0f32; FINGERPRINT_BANDS];
    if mono.len() < FRAME_SIZE || sample_rate == 0 {
        return bands;
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(FRAME_SIZE);

    // Hann window, computed once
    let window: Vec<f32> = (0..FRAME_SIZE)
        .map(|i| {
            let x = i as f32 / (FRAME_SIZE - 1) as f32;
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * x).cos()
        })
        .collect();

    let max_start = mono.len() - FRAME_SIZE;
    let frame_count = MAX_FRAMES.min(max_start / FRAME_SIZE + 1);
    let stride = if frame_count > 1 {
        max_start / (frame_count - 1)
    } else {
        1
    };

    let max_freq = (sample_rate as f32 * 0.45).min(16000.0).max(MIN_FREQ * 2.0);
    let edges = band_edges(MIN_FREQ, max_freq);
    let bin_hz = sample_rate as f32 / FRAME_SIZE as f32;

    let mut buf = vec![Complex::new(0.0f32, 0.0f32); FRAME_SIZE];
    for f in 0..frame_count {
        let start = f * stride;
        for i in 0..FRAME_SIZE {
            buf[i] = Complex::new(mono[start + i] * window[i], 0.0);
        }
        fft.process(&mut buf);

        for (k, c) in buf.iter().enumerate().take(FRAME_SIZE / 2).skip(1) {
            let freq = k as f32 * bin_hz;
            if freq < MIN_FREQ || freq >= max_freq {
                continue;
            }
            let band = band_for(&edges, freq);
            bands[band] += c.norm_sqr();
        }
    }

    // L2 normalize (cosine similarity is scale-free, but normalized
    // fingerprints are nicer to cache and eyeball)
    let norm = bands.iter().map(|b| b * b).sum::<f32>().sqrt();
    if norm > 0.0 {
        for b in bands.iter_mut() {
            *b /= norm;
        }
    }
    bands
}

/// Logarithmically spaced band edges from `lo` to `hi`
fn band_edges(lo: f32, hi: f32) -> Vec<f32> {
    let ratio = (hi / lo).ln() / FINGERPRINT_BANDS as f32;
    (0..=FINGERPRINT_BANDS)
        .map(|i| lo * (ratio * i as f32).exp())
        .collect()
}

fn band_for(edges: &[f32], freq: f32) -> usize {
    match edges.iter().rposition(|&e| e <= freq) {
        Some(i) => i.min(FINGERPRINT_BANDS - 1),
        None => 0,
    }
}

/// Cosine similarity between two fingerprints (0 when either is zero)
pub fn spectral_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na <= 0.0 || nb <= 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(-1.0, 1.0)
}
