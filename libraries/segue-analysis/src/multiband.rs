//! Multiband energy time series
//!
//! 250 ms windows of a region pushed through the 300 Hz / 4 kHz band
//! splitter. The mid band is what the vocal guard watches; the low band
//! drives bass-swap decisions.

use crate::filters::BandSplitter;
use segue_core::{MultibandEnergy, HIGH_SPLIT_HZ, LOW_SPLIT_HZ, MULTIBAND_WINDOW_SECS};

/// Compute the multiband series for `[start_sec, end_sec)` of a mono signal
pub fn multiband_energy(
    mono: &[f32],
    sample_rate: u32,
    start_sec: f64,
    end_sec: f64,
) -> MultibandEnergy {
    let sr = f64::from(sample_rate);
    let start = ((start_sec.max(0.0) * sr) as usize).min(mono.len());
    let end = ((end_sec.max(0.0) * sr) as usize).min(mono.len());
    if start >= end {
        return MultibandEnergy::default();
    }

    let window = ((MULTIBAND_WINDOW_SECS * sr) as usize).max(1);
    let mut splitter = BandSplitter::new(sample_rate, LOW_SPLIT_HZ, HIGH_SPLIT_HZ);
    let mut out = MultibandEnergy::default();

    for chunk in mono[start..end].chunks(window) {
        let (mut l, mut m, mut h) = (0.0f64, 0.0f64, 0.0f64);
        for &x in chunk {
            let (lo, mi, hi) = splitter.process(x);
            l += f64::from(lo) * f64::from(lo);
            m += f64::from(mi) * f64::from(mi);
            h += f64::from(hi) * f64::from(hi);
        }
        let n = chunk.len() as f64;
        out.low.push((l / n).sqrt() as f32);
        out.mid.push((m / n).sqrt() as f32);
        out.high.push((h / n).sqrt() as f32);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44100;

    #[test]
    fn window_count_matches_region_length() {
        let mono = vec![0.1f32; SR as usize * 3];
        let mb = multiband_energy(&mono, SR, 0.0, 3.0);
        assert_eq!(mb.window_count(), 12);
    }

    #[test]
    fn mid_tone_dominates_mid_band() {
        let mono: Vec<f32> = (0..SR as usize * 2)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / SR as f32).sin() * 0.5)
            .collect();
        let mb = multiband_energy(&mono, SR, 0.0, 2.0);
        // Skip the first window (filter settle)
        for i in 1..mb.window_count() {
            assert!(mb.mid[i] > mb.low[i] * 3.0);
            assert!(mb.mid[i] > mb.high[i] * 3.0);
        }
    }

    #[test]
    fn empty_region_is_empty() {
        let mono = vec![0.1f32; SR as usize];
        let mb = multiband_energy(&mono, SR, 5.0, 2.0);
        assert_eq!(mb.window_count(), 0);
    }
}
