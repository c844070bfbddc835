//! Vocal activity guard
//!
//! Mid-band dominance over the outro multiband series marks likely vocal
//! phrases; the crossfade start is deferred while one is active, within a
//! bounded budget so the transition can never be pushed off the end of the
//! track.

use segue_core::MultibandEnergy;

/// Mid-band share above this reads as a vocal phrase
const VOCAL_DOMINANCE: f32 = 0.6;

/// Band totals below this are silence, never vocals
const MIN_TOTAL: f32 = 0.001;

/// Hard cap on vocal deferral in seconds
const MAX_DEFER_SECS: f64 = 5.0;

/// Whether the window at `idx` is mid-band dominated
pub fn is_vocal_active(multiband: &MultibandEnergy, idx: usize) -> bool {
    let count = multiband.window_count();
    if count == 0 {
        return false;
    }
    let idx = idx.min(count - 1);
    let total = multiband.total_at(idx);
    if total <= MIN_TOTAL {
        return false;
    }
    multiband.mid[idx] / total > VOCAL_DOMINANCE
}

/// Maximum deferral budget for a planned crossfade
pub fn defer_budget(crossfade_duration: f64, crossfade_start: f64, effective_end: f64) -> f64 {
    (crossfade_duration * 0.5)
        .min(MAX_DEFER_SECS)
        .min(effective_end - crossfade_start - 2.0)
        .max(0.0)
}

/// Defer the crossfade start while vocals are active and budget remains
///
/// `region_start` is the track time where the outro multiband series
/// begins. The activity check tracks the current moment (the would-be
/// start if the crossfade began now), so it clears when the phrase ends.
pub fn should_defer_for_vocals(
    current_time: f64,
    crossfade_start: f64,
    effective_end: f64,
    outro_multiband: &MultibandEnergy,
    region_start: f64,
    crossfade_duration: f64,
) -> bool {
    let budget = defer_budget(crossfade_duration, crossfade_start, effective_end);
    let deferred_so_far = (current_time - crossfade_start).max(0.0);
    if deferred_so_far >= budget {
        return false;
    }

    let probe = current_time.max(crossfade_start);
    let idx = MultibandEnergy::window_index(probe - region_start);
    is_vocal_active(outro_multiband, idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multiband(mid_heavy: &[bool]) -> MultibandEnergy {
        MultibandEnergy {
            low: mid_heavy.iter().map(|_| 0.1).collect(),
            mid: mid_heavy.iter().map(|&v| if v { 0.9 } else { 0.1 }).collect(),
            high: mid_heavy.iter().map(|_| 0.1).collect(),
        }
    }

    #[test]
    fn mid_dominance_reads_as_vocal() {
        let mb = multiband(&[true, false]);
        assert!(is_vocal_active(&mb, 0));
        assert!(!is_vocal_active(&mb, 1));
    }

    #[test]
    fn silence_is_never_vocal() {
        let mb = MultibandEnergy {
            low: vec![0.0001],
            mid: vec![0.0005],
            high: vec![0.0001],
        };
        assert!(!is_vocal_active(&mb, 0));
    }

    #[test]
    fn out_of_range_index_clamps_to_last_window() {
        let mb = multiband(&[false, true]);
        assert!(is_vocal_active(&mb, 100));
    }

    #[test]
    fn budget_is_bounded_by_duration_cap_and_remaining_content() {
        // duration/2 wins
        assert!((defer_budget(6.0, 100.0, 150.0) - 3.0).abs() < 1e-9);
        // 5 s cap wins
        assert!((defer_budget(20.0, 100.0, 150.0) - 5.0).abs() < 1e-9);
        // remaining content wins
        assert!((defer_budget(20.0, 100.0, 104.0) - 2.0).abs() < 1e-9);
        // never negative
        assert_eq!(defer_budget(8.0, 100.0, 101.0), 0.0);
    }

    #[test]
    fn defers_while_vocal_then_stops_at_budget() {
        // Vocals active across the whole region
        let mb = multiband(&[true; 40]);
        let region_start = 90.0;
        let start = 95.0;
        let end = 110.0;
        // At the planned start: defer
        assert!(should_defer_for_vocals(95.0, start, end, &mb, region_start, 8.0));
        // Budget = min(4, 5, 13) = 4: still deferring just before
        assert!(should_defer_for_vocals(98.9, start, end, &mb, region_start, 8.0));
        // Budget exhausted
        assert!(!should_defer_for_vocals(99.1, start, end, &mb, region_start, 8.0));
    }

    #[test]
    fn clears_when_the_phrase_ends() {
        // Vocal for the first second of windows after the start, then clear
        let mut pattern = vec![false; 40];
        for i in 20..24 {
            pattern[i] = true;
        }
        let mb = multiband(&pattern);
        let region_start = 90.0;
        let start = 95.0; // window 20
        let end = 110.0;
        assert!(should_defer_for_vocals(95.0, start, end, &mb, region_start, 8.0));
        // One second later the phrase has passed
        assert!(!should_defer_for_vocals(96.1, start, end, &mb, region_start, 8.0));
    }
}
