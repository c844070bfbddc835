//! Intro character analysis
//!
//! Consumed when a track is the incoming side of a crossfade: a quiet or
//! slowly building intro tolerates (and benefits from) a longer overlap.

use crate::multiband::multiband_energy;
use segue_core::{EnergyAnalysis, IntroAnalysis};

/// RMS below this is a quiet lead-in (about -40 dBFS)
const QUIET_RMS: f32 = 0.01;

/// Quiet-intro scan window in seconds
const SCAN_WINDOW: f64 = 0.25;

/// Intro multiband region length in seconds
const MULTIBAND_SECS: f64 = 15.0;

/// Analyze the intro character of a mono signal
pub fn analyze_intro(mono: &[f32], sample_rate: u32, energy: &EnergyAnalysis) -> IntroAnalysis {
    let sr = f64::from(sample_rate);
    let duration = mono.len() as f64 / sr;

    // Quiet lead-in: 250 ms windows from the start below the floor
    let win = ((SCAN_WINDOW * sr) as usize).max(1);
    let mut quiet_windows = 0usize;
    for chunk in mono.chunks(win) {
        let sum: f64 = chunk.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
        let rms = (sum / chunk.len() as f64).sqrt() as f32;
        if rms >= QUIET_RMS {
            break;
        }
        quiet_windows += 1;
    }
    let quiet_intro_duration = (quiet_windows as f64 * SCAN_WINDOW).min(duration);

    // Build time: from the end of the quiet lead-in until per-second energy
    // reaches 75% of the track average
    let build_threshold = 0.75 * energy.average_energy;
    let first_full = energy
        .energy_per_second
        .iter()
        .enumerate()
        .skip(quiet_intro_duration as usize)
        .find(|(_, &e)| e >= build_threshold)
        .map_or(quiet_intro_duration, |(i, _)| i as f64);
    let energy_build_duration = (first_full - quiet_intro_duration).max(0.0);

    // How loud the first stretch is relative to the track's loudest content
    let head: Vec<f32> = energy.energy_per_second.iter().take(8).copied().collect();
    let intro_energy_ratio = if head.is_empty() {
        0.0
    } else {
        (head.iter().sum::<f32>() / head.len() as f32).clamp(0.0, 2.0)
    };

    let mb_start = quiet_intro_duration;
    let mb_end = (mb_start + MULTIBAND_SECS).min(duration);
    let multiband = if mb_end - mb_start >= 2.0 {
        Some(multiband_energy(mono, sample_rate, mb_start, mb_end))
    } else {
        None
    };

    IntroAnalysis {
        quiet_intro_duration,
        energy_build_duration,
        intro_energy_ratio,
        multiband,
    }
}
