//! Crossfade gain curves
//!
//! Pure math: the (outgoing, incoming) gain pair for a progress value, the
//! sampled curve arrays the scheduler feeds to `set_value_curve`, and the
//! bass-swap shape used by the spectral EQ's low band.

use segue_core::FadeCurveKind;

/// Samples per second of crossfade when building curve arrays
const CURVE_RATE: f64 = 48.0;

/// Minimum curve array resolution
const MIN_RESOLUTION: usize = 64;

/// Which side of the crossfade a curve array drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveChannel {
    Outgoing,
    Incoming,
}

/// Gain pair (outgoing, incoming) at `progress` in [0, 1]
///
/// Shape exponents are applied after the base curve; for the power-
/// preserving curves the pair is then renormalized so
/// `out^2 + in^2 == 1` still holds.
pub fn crossfade_gains(
    progress: f64,
    curve: FadeCurveKind,
    in_shape: f32,
    out_shape: f32,
) -> (f32, f32) {
    let t = progress.clamp(0.0, 1.0);

    let (mut out_vol, mut in_vol) = match curve {
        FadeCurveKind::Linear => ((1.0 - t) as f32, t as f32),
        FadeCurveKind::EqualPower => {
            let angle = std::f64::consts::FRAC_PI_2 * t;
            (angle.cos() as f32, angle.sin() as f32)
        }
        FadeCurveKind::SCurve => {
            // Smootherstep (C2-continuous) time warp into the
            // equal-power pair
            let s = t * t * t * (t * (t * 6.0 - 15.0) + 10.0);
            let angle = std::f64::consts::FRAC_PI_2 * s;
            (angle.cos() as f32, angle.sin() as f32)
        }
    };

    if out_shape != 1.0 {
        out_vol = out_vol.max(0.0).powf(out_shape);
    }
    if in_shape != 1.0 {
        in_vol = in_vol.max(0.0).powf(in_shape);
    }

    // Restore constant power after shaping
    if (in_shape != 1.0 || out_shape != 1.0)
        && matches!(curve, FadeCurveKind::EqualPower | FadeCurveKind::SCurve)
    {
        let power = out_vol * out_vol + in_vol * in_vol;
        if power > 0.0 {
            let scale = power.sqrt().recip();
            out_vol *= scale;
            in_vol *= scale;
        }
    }

    (out_vol, in_vol)
}

/// Curve array resolution for a crossfade duration (~48 samples/sec)
pub fn curve_resolution(duration: f64) -> usize {
    ((duration * CURVE_RATE).ceil() as usize).max(MIN_RESOLUTION)
}

/// Sampled gain curve over `[start_progress, end_progress]`, scaled to
/// `target_gain`, for one channel
pub fn build_curve_array(
    resolution: usize,
    start_progress: f64,
    end_progress: f64,
    curve: FadeCurveKind,
    in_shape: f32,
    out_shape: f32,
    target_gain: f32,
    channel: CurveChannel,
) -> Vec<f32> {
    let resolution = resolution.max(2);
    let span = end_progress - start_progress;
    (0..resolution)
        .map(|i| {
            let frac = i as f64 / (resolution - 1) as f64;
            let progress = start_progress + span * frac;
            let (out_vol, in_vol) = crossfade_gains(progress, curve, in_shape, out_shape);
            let v = match channel {
                CurveChannel::Outgoing => out_vol,
                CurveChannel::Incoming => in_vol,
            };
            v * target_gain
        })
        .collect()
}

/// Linear ramp array (used for dB automation)
pub fn build_linear_curve(resolution: usize, start_value: f32, end_value: f32) -> Vec<f32> {
    let resolution = resolution.max(2);
    (0..resolution)
        .map(|i| {
            let frac = i as f32 / (resolution - 1) as f32;
            start_value + (end_value - start_value) * frac
        })
        .collect()
}

/// Scalar bass-swap value: hold until 40%, ramp to 60%, hold after
///
/// Swapping low-frequency content at the midpoint instead of overlapping
/// it keeps the bass from going muddy.
pub fn bass_swap_value_at(progress: f64, start_value: f32, end_value: f32) -> f32 {
    let t = progress.clamp(0.0, 1.0);
    if t <= 0.4 {
        start_value
    } else if t >= 0.6 {
        end_value
    } else {
        let frac = ((t - 0.4) / 0.2) as f32;
        start_value + (end_value - start_value) * frac
    }
}

/// Sampled bass-swap curve
pub fn build_bass_swap_curve(resolution: usize, start_value: f32, end_value: f32) -> Vec<f32> {
    let resolution = resolution.max(2);
    (0..resolution)
        .map(|i| {
            let progress = i as f64 / (resolution - 1) as f64;
            bass_swap_value_at(progress, start_value, end_value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CURVES: [FadeCurveKind; 3] = [
        FadeCurveKind::Linear,
        FadeCurveKind::EqualPower,
        FadeCurveKind::SCurve,
    ];

    #[test]
    fn endpoints_are_exact_for_all_curves_and_shapes() {
        for curve in CURVES {
            for &(in_shape, out_shape) in &[(1.0, 1.0), (1.15, 0.95), (0.85, 1.2), (0.7, 1.3)] {
                let (out0, in0) = crossfade_gains(0.0, curve, in_shape, out_shape);
                let (out1, in1) = crossfade_gains(1.0, curve, in_shape, out_shape);
                assert!((out0 - 1.0).abs() < 1e-6, "{curve:?} out(0)");
                assert!(in0.abs() < 1e-6, "{curve:?} in(0)");
                assert!(out1.abs() < 1e-6, "{curve:?} out(1)");
                assert!((in1 - 1.0).abs() < 1e-6, "{curve:?} in(1)");
            }
        }
    }

    #[test]
    fn equal_power_midpoint_is_minus_three_db() {
        let (out_vol, in_vol) = crossfade_gains(0.5, FadeCurveKind::EqualPower, 1.0, 1.0);
        assert!((out_vol - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((in_vol - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    proptest! {
        /// Power preservation holds for shaped equal-power and s-curves
        #[test]
        fn power_is_preserved_under_shaping(
            progress in 0.0f64..=1.0,
            in_shape in 0.7f32..=1.3,
            out_shape in 0.7f32..=1.3,
            scurve in proptest::bool::ANY,
        ) {
            let curve = if scurve { FadeCurveKind::SCurve } else { FadeCurveKind::EqualPower };
            let (out_vol, in_vol) = crossfade_gains(progress, curve, in_shape, out_shape);
            let power = out_vol * out_vol + in_vol * in_vol;
            prop_assert!((power - 1.0).abs() < 1e-5, "power {power} at {progress}");
        }

        /// Incoming gain is monotone non-decreasing in progress
        #[test]
        fn incoming_gain_is_monotone(
            a in 0.0f64..=1.0,
            b in 0.0f64..=1.0,
            in_shape in 0.7f32..=1.3,
            out_shape in 0.7f32..=1.3,
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            for curve in CURVES {
                let (_, in_lo) = crossfade_gains(lo, curve, in_shape, out_shape);
                let (_, in_hi) = crossfade_gains(hi, curve, in_shape, out_shape);
                prop_assert!(in_hi >= in_lo - 1e-5);
            }
        }
    }

    #[test]
    fn curve_resolution_floor_and_rate() {
        assert_eq!(curve_resolution(0.5), 64);
        assert_eq!(curve_resolution(2.0), 96);
        assert_eq!(curve_resolution(10.0), 480);
    }

    #[test]
    fn curve_array_spans_progress_range() {
        let arr = build_curve_array(
            100,
            0.0,
            1.0,
            FadeCurveKind::Linear,
            1.0,
            1.0,
            0.8,
            CurveChannel::Incoming,
        );
        assert_eq!(arr.len(), 100);
        assert!(arr[0].abs() < 1e-6);
        assert!((arr[99] - 0.8).abs() < 1e-6);
        // Partial range: resuming from 50%
        let tail = build_curve_array(
            50,
            0.5,
            1.0,
            FadeCurveKind::Linear,
            1.0,
            1.0,
            1.0,
            CurveChannel::Outgoing,
        );
        assert!((tail[0] - 0.5).abs() < 1e-6);
        assert!(tail[49].abs() < 1e-6);
    }

    #[test]
    fn bass_swap_holds_then_ramps_then_holds() {
        assert_eq!(bass_swap_value_at(0.0, -4.0, 0.0), -4.0);
        assert_eq!(bass_swap_value_at(0.39, -4.0, 0.0), -4.0);
        assert!((bass_swap_value_at(0.5, -4.0, 0.0) - (-2.0)).abs() < 1e-6);
        assert_eq!(bass_swap_value_at(0.61, -4.0, 0.0), 0.0);
        assert_eq!(bass_swap_value_at(1.0, -4.0, 0.0), 0.0);

        let arr = build_bass_swap_curve(101, -4.0, 0.0);
        assert_eq!(arr[0], -4.0);
        assert_eq!(arr[40], -4.0);
        assert_eq!(arr[60], 0.0);
        assert_eq!(arr[100], 0.0);
    }

    #[test]
    fn linear_curve_endpoints() {
        let arr = build_linear_curve(64, -6.0, 0.0);
        assert_eq!(arr[0], -6.0);
        assert_eq!(arr[63], 0.0);
    }
}
