//! Spectral EQ for crossfade morphing
//!
//! Inserts a 3-band chain (low shelf 300 Hz -> peaking 1.1 kHz -> high
//! shelf 4 kHz) between each track's gain node and the destination, then
//! ramps per-band dB so the outgoing track's spectrum morphs toward the
//! incoming one across the overlap. Zero dB everywhere is pass-through.

use crate::curves::{bass_swap_value_at, build_bass_swap_curve, build_linear_curve, curve_resolution};
use segue_core::{EngineError, Result, SpectralCrossfadeData};
use segue_graph::{BiquadKind, GraphHandle, NodeId};

const LOW_SHELF_HZ: f32 = 300.0;
const PEAK_HZ: f32 = 1100.0;
const PEAK_Q: f32 = 0.7;
const HIGH_SHELF_HZ: f32 = 4000.0;

/// Default ramp for `force_complete`
pub const COMPLETE_RAMP_SECS: f64 = 0.05;

struct EqChain {
    host_gain: NodeId,
    bands: [NodeId; 3],
}

/// One crossfade's EQ chains and their automation
pub struct SpectralEq {
    graph: GraphHandle,
    outgoing: Option<EqChain>,
    incoming: Option<EqChain>,
    data: SpectralCrossfadeData,
}

impl SpectralEq {
    /// Insert chains and schedule the per-band dB ramps
    ///
    /// The outgoing chain is skipped when `fade_in_only` (a fading track is
    /// not worth morphing) or when no outgoing gain exists.
    pub fn setup(
        graph: &GraphHandle,
        outgoing_gain: Option<NodeId>,
        incoming_gain: NodeId,
        data: SpectralCrossfadeData,
        start_time: f64,
        duration: f64,
        fade_in_only: bool,
    ) -> Result<Self> {
        let outgoing = if fade_in_only {
            None
        } else {
            outgoing_gain.and_then(|g| Self::insert_chain(graph, g))
        };
        let incoming = Self::insert_chain(graph, incoming_gain)
            .ok_or_else(|| EngineError::GraphSetup("incoming gain missing for EQ".into()))?;

        let eq = Self {
            graph: graph.clone(),
            outgoing,
            incoming: Some(incoming),
            data,
        };
        eq.schedule_range(0.0, start_time, duration);
        Ok(eq)
    }

    /// Build low -> peak -> high between the gain node and the destination
    fn insert_chain(graph: &GraphHandle, host_gain: NodeId) -> Option<EqChain> {
        graph.with(|ctx| {
            if !ctx.is_alive(host_gain) {
                return None;
            }
            let dest = ctx.destination();
            let low = ctx.create_biquad(BiquadKind::LowShelf, LOW_SHELF_HZ, 0.707);
            let peak = ctx.create_biquad(BiquadKind::Peaking, PEAK_HZ, PEAK_Q);
            let high = ctx.create_biquad(BiquadKind::HighShelf, HIGH_SHELF_HZ, 0.707);

            ctx.disconnect_from(host_gain, dest);
            ctx.connect(host_gain, low).ok()?;
            ctx.connect(low, peak).ok()?;
            ctx.connect(peak, high).ok()?;
            ctx.connect(high, dest).ok()?;
            Some(EqChain {
                host_gain,
                bands: [low, peak, high],
            })
        })
    }

    /// Per-band dB values at a progress point: (outgoing, incoming)
    pub fn band_values_at(&self, progress: f64) -> ([f32; 3], [f32; 3]) {
        let p = progress.clamp(0.0, 1.0) as f32;
        let mut out = [0.0f32; 3];
        let mut inc = [0.0f32; 3];
        for band in 0..3 {
            let out_target = self.data.out_target_db[band];
            let in_initial = self.data.in_initial_db[band];
            if band == 0 && self.data.bass_swap_low {
                out[band] = bass_swap_value_at(f64::from(p), 0.0, out_target);
                inc[band] = bass_swap_value_at(f64::from(p), in_initial, 0.0);
            } else {
                out[band] = out_target * p;
                inc[band] = in_initial * (1.0 - p);
            }
        }
        (out, inc)
    }

    /// Schedule dB curves for `[progress, 1]` mapped onto
    /// `[start_time, start_time + remaining]`
    fn schedule_range(&self, progress: f64, start_time: f64, remaining: f64) {
        let resolution = curve_resolution(remaining);
        self.graph.with(|ctx| {
            for (chain, is_outgoing) in [(&self.outgoing, true), (&self.incoming, false)] {
                let Some(chain) = chain else { continue };
                for band in 0..3 {
                    let (from, to) = if is_outgoing {
                        (0.0, self.data.out_target_db[band])
                    } else {
                        (self.data.in_initial_db[band], 0.0)
                    };
                    let values = if band == 0 && self.data.bass_swap_low {
                        if progress <= 0.0 {
                            build_bass_swap_curve(resolution, from, to)
                        } else {
                            sample_progress_range(resolution, progress, |p| {
                                bass_swap_value_at(p, from, to)
                            })
                        }
                    } else {
                        let at = |p: f64| from + (to - from) * p as f32;
                        if progress <= 0.0 {
                            build_linear_curve(resolution, from, to)
                        } else {
                            sample_progress_range(resolution, progress, at)
                        }
                    };
                    if let Some(node) = ctx.biquad_mut(chain.bands[band]) {
                        node.gain_db.cancel_scheduled(start_time);
                        node.gain_db
                            .set_value_at(start_time, values.first().copied().unwrap_or(0.0));
                        node.gain_db.set_value_curve(start_time, remaining, values);
                    }
                }
            }
        });
    }

    /// Freeze automation at the dB values for `progress`
    pub fn pause_at(&self, progress: f64, now: f64) {
        let (out, inc) = self.band_values_at(progress);
        self.graph.with(|ctx| {
            for (chain, values) in [(&self.outgoing, out), (&self.incoming, inc)] {
                let Some(chain) = chain else { continue };
                for band in 0..3 {
                    if let Some(node) = ctx.biquad_mut(chain.bands[band]) {
                        node.gain_db.set_value(now, values[band]);
                    }
                }
            }
        });
    }

    /// Rebuild curves for the remaining range after a pause
    pub fn resume_from(&self, progress: f64, now: f64, remaining: f64) {
        self.schedule_range(progress, now, remaining.max(0.01));
    }

    /// Linear-ramp all bands back to 0 dB
    pub fn force_complete(&self, now: f64, ramp_secs: f64) {
        self.graph.with(|ctx| {
            for chain in [&self.outgoing, &self.incoming].into_iter().flatten() {
                for &band in &chain.bands {
                    if let Some(node) = ctx.biquad_mut(band) {
                        node.gain_db.cancel_scheduled(now);
                        node.gain_db.linear_ramp_to(now, now + ramp_secs, 0.0);
                    }
                }
            }
        });
    }

    /// Zero all bands instantly
    pub fn cancel(&self, now: f64) {
        self.graph.with(|ctx| {
            for chain in [&self.outgoing, &self.incoming].into_iter().flatten() {
                for &band in &chain.bands {
                    if let Some(node) = ctx.biquad_mut(band) {
                        node.gain_db.set_value(now, 0.0);
                    }
                }
            }
        });
    }

    /// Remove the filters and restore direct gain -> destination wiring
    pub fn cleanup_with_reconnect(self) {
        self.graph.with(|ctx| {
            let dest = ctx.destination();
            for chain in [self.outgoing, self.incoming].into_iter().flatten() {
                for band in chain.bands {
                    ctx.remove_node(band);
                }
                if ctx.is_alive(chain.host_gain) && ctx.output_count(chain.host_gain) == 0 {
                    let _ = ctx.connect(chain.host_gain, dest);
                }
            }
        });
    }

    /// Whether an outgoing chain was inserted
    pub fn has_outgoing_chain(&self) -> bool {
        self.outgoing.is_some()
    }
}

/// Sample `f` over progress `[from, 1]`
fn sample_progress_range(resolution: usize, from: f64, f: impl Fn(f64) -> f32) -> Vec<f32> {
    let resolution = resolution.max(2);
    let span = 1.0 - from;
    (0..resolution)
        .map(|i| f(from + span * i as f64 / (resolution - 1) as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use segue_graph::{AudioBuffer, Sound};

    fn setup_graph() -> (GraphHandle, Sound, Sound) {
        let graph = GraphHandle::new(8000);
        let buffer = AudioBuffer::from_mono(&vec![0.5; 8000 * 20], 8000);
        let outgoing = Sound::new(&graph, buffer.clone(), 1.0).unwrap();
        let incoming = Sound::new(&graph, buffer, 0.0).unwrap();
        (graph, outgoing, incoming)
    }

    fn data(bass_swap: bool) -> SpectralCrossfadeData {
        SpectralCrossfadeData {
            out_target_db: [-4.0, 2.0, -3.0],
            in_initial_db: [4.0, -2.0, 3.0],
            bass_swap_low: bass_swap,
        }
    }

    #[test]
    fn setup_rewires_gain_through_chain() {
        let (graph, outgoing, incoming) = setup_graph();
        let eq = SpectralEq::setup(
            &graph,
            Some(outgoing.gain_node()),
            incoming.gain_node(),
            data(false),
            0.0,
            4.0,
            false,
        )
        .unwrap();

        // Each hosting gain has exactly one child (the first filter)
        graph.with(|ctx| {
            assert_eq!(ctx.output_count(outgoing.gain_node()), 1);
            assert_eq!(ctx.output_count(incoming.gain_node()), 1);
            let child = ctx.outputs_of(outgoing.gain_node())[0];
            assert_ne!(child, ctx.destination());
        });

        eq.cleanup_with_reconnect();
        graph.with(|ctx| {
            assert_eq!(ctx.output_count(outgoing.gain_node()), 1);
            assert_eq!(ctx.outputs_of(outgoing.gain_node())[0], ctx.destination());
            assert_eq!(ctx.outputs_of(incoming.gain_node())[0], ctx.destination());
        });
    }

    #[test]
    fn fade_in_only_skips_outgoing_chain() {
        let (graph, outgoing, incoming) = setup_graph();
        let eq = SpectralEq::setup(
            &graph,
            Some(outgoing.gain_node()),
            incoming.gain_node(),
            data(false),
            0.0,
            4.0,
            true,
        )
        .unwrap();
        assert!(!eq.has_outgoing_chain());
        graph.with(|ctx| {
            assert_eq!(ctx.outputs_of(outgoing.gain_node())[0], ctx.destination());
        });
        eq.cleanup_with_reconnect();
    }

    #[test]
    fn band_values_interpolate_linearly() {
        let (graph, outgoing, incoming) = setup_graph();
        let eq = SpectralEq::setup(
            &graph,
            Some(outgoing.gain_node()),
            incoming.gain_node(),
            data(false),
            0.0,
            4.0,
            false,
        )
        .unwrap();
        let (out, inc) = eq.band_values_at(0.5);
        assert!((out[0] - (-2.0)).abs() < 1e-6);
        assert!((out[1] - 1.0).abs() < 1e-6);
        assert!((inc[0] - 2.0).abs() < 1e-6);
        assert!((inc[2] - 1.5).abs() < 1e-6);
        eq.cleanup_with_reconnect();
    }

    #[test]
    fn bass_swap_low_band_holds_until_forty_percent() {
        let (graph, outgoing, incoming) = setup_graph();
        let eq = SpectralEq::setup(
            &graph,
            Some(outgoing.gain_node()),
            incoming.gain_node(),
            data(true),
            0.0,
            4.0,
            false,
        )
        .unwrap();
        let (out_early, inc_early) = eq.band_values_at(0.3);
        assert_eq!(out_early[0], 0.0);
        assert_eq!(inc_early[0], 4.0);
        let (out_late, inc_late) = eq.band_values_at(0.7);
        assert_eq!(out_late[0], -4.0);
        assert_eq!(inc_late[0], 0.0);
        // Mid band stays linear
        assert!((out_late[1] - 1.4).abs() < 1e-6);
        eq.cleanup_with_reconnect();
    }

    #[test]
    fn cancel_zeroes_band_gains() {
        let (graph, outgoing, incoming) = setup_graph();
        let eq = SpectralEq::setup(
            &graph,
            Some(outgoing.gain_node()),
            incoming.gain_node(),
            data(false),
            0.0,
            4.0,
            false,
        )
        .unwrap();
        graph.advance_secs(2.0);
        let now = graph.current_time();
        eq.cancel(now);
        // Rendering past the cancel point leaves everything at 0 dB
        graph.advance_secs(1.0);
        eq.cleanup_with_reconnect();
    }
}
