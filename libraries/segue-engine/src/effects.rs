//! Add-on transition effects
//!
//! Three optional layers on top of the crossfade, all scoped to a single
//! transition and fully torn down afterwards:
//!
//! - **Reverb tail**: a parallel convolver branch off the outgoing gain
//!   with a synthesized decaying-noise impulse response
//! - **Noise riser**: a standalone bandpassed white-noise sweep building
//!   into the incoming track
//! - **Filter sweep**: DJ-style inline low-pass on the outgoing and
//!   high-pass on the incoming gain

use rand::Rng;
use segue_graph::{AudioBuffer, BiquadKind, GraphHandle, NodeId};

/// Reverb branch level during the crossfade
const REVERB_BRANCH_GAIN: f32 = 0.15;

/// Reverb IR decay bounds in seconds
const REVERB_DECAY_MIN: f64 = 1.5;
const REVERB_DECAY_MAX: f64 = 3.0;

/// Noise riser duration bounds in seconds
const RISER_MIN_SECS: f64 = 1.0;
const RISER_MAX_SECS: f64 = 2.0;

/// Riser band sweep start and default target in Hz
const RISER_START_HZ: f32 = 200.0;
const RISER_TARGET_HZ: f32 = 2000.0;

/// -24 dB and -12 dB as linear gains
const RISER_GAIN_START: f32 = 0.063;
const RISER_GAIN_PEAK: f32 = 0.251;

/// What to instantiate for one transition
#[derive(Debug, Clone, Copy)]
pub struct EffectsSpec {
    pub reverb_tail: bool,
    pub noise_riser: bool,
    pub filter_sweep: bool,
    pub sweep_intensity: f32,
    /// Outgoing track tempo, for beat-quantizing the riser
    pub bpm: Option<f32>,
    pub fade_in_only: bool,
}

struct ReverbTail {
    convolver: NodeId,
    branch_gain: NodeId,
}

struct NoiseRiser {
    source: NodeId,
    bandpass: NodeId,
    gain: NodeId,
}

struct FilterSweep {
    out_filter: Option<NodeId>,
    in_filter: NodeId,
    incoming_gain: NodeId,
}

/// All effect nodes owned by one crossfade
pub struct TransitionEffects {
    graph: GraphHandle,
    reverb: Option<ReverbTail>,
    riser: Option<NoiseRiser>,
    sweep: Option<FilterSweep>,
    duration: f64,
}

impl TransitionEffects {
    /// Build and schedule the requested effects on the shared graph
    pub fn create(
        graph: &GraphHandle,
        outgoing_gain: Option<NodeId>,
        incoming_gain: NodeId,
        start_time: f64,
        duration: f64,
        spec: &EffectsSpec,
    ) -> Self {
        let reverb = if spec.reverb_tail {
            outgoing_gain.and_then(|g| build_reverb(graph, g, start_time, duration))
        } else {
            None
        };
        let riser = if spec.noise_riser {
            build_riser(graph, start_time, duration, spec.bpm)
        } else {
            None
        };
        let sweep = if spec.filter_sweep {
            build_sweep(
                graph,
                outgoing_gain,
                incoming_gain,
                start_time,
                duration,
                spec.sweep_intensity,
                spec.fade_in_only,
            )
        } else {
            None
        };

        tracing::debug!(
            reverb = reverb.is_some(),
            riser = riser.is_some(),
            sweep = sweep.is_some(),
            "transition effects created"
        );

        Self {
            graph: graph.clone(),
            reverb,
            riser,
            sweep,
            duration,
        }
    }

    /// Freeze all effect automation at current values
    pub fn pause(&self, now: f64) {
        self.graph.with(|ctx| {
            if let Some(reverb) = &self.reverb {
                if let Some(g) = ctx.gain_mut(reverb.branch_gain) {
                    g.gain.cancel_scheduled(now);
                }
            }
            if let Some(riser) = &self.riser {
                if let Some(src) = ctx.source_mut(riser.source) {
                    src.pause();
                }
                if let Some(bp) = ctx.biquad_mut(riser.bandpass) {
                    bp.frequency.cancel_scheduled(now);
                }
                if let Some(g) = ctx.gain_mut(riser.gain) {
                    g.gain.cancel_scheduled(now);
                }
            }
            if let Some(sweep) = &self.sweep {
                for filter in [sweep.out_filter, Some(sweep.in_filter)].into_iter().flatten() {
                    if let Some(b) = ctx.biquad_mut(filter) {
                        b.frequency.cancel_scheduled(now);
                    }
                }
            }
        });
    }

    /// Re-ramp everything toward its final target
    ///
    /// The exact original schedule is not recoverable after a pause; targets
    /// are re-approached over half the original duration.
    pub fn resume(&self, now: f64) {
        let ramp = (self.duration * 0.5).max(0.1);
        self.graph.with(|ctx| {
            if let Some(reverb) = &self.reverb {
                if let Some(g) = ctx.gain_mut(reverb.branch_gain) {
                    g.gain.linear_ramp_to(now, now + ramp, 0.0);
                }
            }
            if let Some(riser) = &self.riser {
                if let Some(src) = ctx.source_mut(riser.source) {
                    src.start();
                }
                if let Some(bp) = ctx.biquad_mut(riser.bandpass) {
                    bp.frequency.exponential_ramp_to(now, now + ramp, RISER_TARGET_HZ);
                }
                if let Some(g) = ctx.gain_mut(riser.gain) {
                    g.gain.linear_ramp_to(now, now + ramp, 0.0);
                }
            }
            if let Some(sweep) = &self.sweep {
                if let Some(filter) = sweep.out_filter {
                    if let Some(b) = ctx.biquad_mut(filter) {
                        let target = b.frequency.value_at(now).min(2000.0);
                        b.frequency.exponential_ramp_to(now, now + ramp, target);
                    }
                }
                if let Some(b) = ctx.biquad_mut(sweep.in_filter) {
                    b.frequency.exponential_ramp_to(now, now + ramp, 20.0);
                }
            }
        });
    }

    /// Tear everything down and restore direct wiring where appropriate
    ///
    /// The incoming gain is reconnected to the destination; the outgoing
    /// gain is not (the outgoing sound is about to be destroyed).
    pub fn cleanup(self) {
        self.graph.with(|ctx| {
            let dest = ctx.destination();
            if let Some(reverb) = self.reverb {
                ctx.remove_node(reverb.convolver);
                ctx.remove_node(reverb.branch_gain);
            }
            if let Some(riser) = self.riser {
                if let Some(src) = ctx.source_mut(riser.source) {
                    src.stop();
                }
                ctx.remove_node(riser.source);
                ctx.remove_node(riser.bandpass);
                ctx.remove_node(riser.gain);
            }
            if let Some(sweep) = self.sweep {
                if let Some(filter) = sweep.out_filter {
                    ctx.remove_node(filter);
                }
                ctx.remove_node(sweep.in_filter);
                if ctx.is_alive(sweep.incoming_gain)
                    && ctx.output_count(sweep.incoming_gain) == 0
                {
                    let _ = ctx.connect(sweep.incoming_gain, dest);
                }
            }
        });
    }

    pub fn has_reverb(&self) -> bool {
        self.reverb.is_some()
    }

    pub fn has_riser(&self) -> bool {
        self.riser.is_some()
    }

    pub fn has_sweep(&self) -> bool {
        self.sweep.is_some()
    }
}

// ===== Builders =====

/// Parallel convolver branch with a synthesized decaying-noise IR
fn build_reverb(
    graph: &GraphHandle,
    outgoing_gain: NodeId,
    start_time: f64,
    duration: f64,
) -> Option<ReverbTail> {
    let decay = duration.clamp(REVERB_DECAY_MIN, REVERB_DECAY_MAX);
    let sample_rate = graph.sample_rate();
    let impulse = synthesize_impulse(sample_rate, decay);

    graph.with(|ctx| {
        if !ctx.is_alive(outgoing_gain) {
            return None;
        }
        let convolver = ctx.create_convolver(&impulse).ok()?;
        let branch_gain = ctx.create_gain(REVERB_BRANCH_GAIN);
        let dest = ctx.destination();
        ctx.connect(outgoing_gain, convolver).ok()?;
        ctx.connect(convolver, branch_gain).ok()?;
        ctx.connect(branch_gain, dest).ok()?;

        // Hold at 0.15 for 80% of the crossfade, then ramp out
        if let Some(g) = ctx.gain_mut(branch_gain) {
            g.gain.set_value_at(start_time, REVERB_BRANCH_GAIN);
            g.gain
                .set_value_at(start_time + duration * 0.8, REVERB_BRANCH_GAIN);
            g.gain
                .linear_ramp_to(start_time + duration * 0.8, start_time + duration, 0.0);
        }
        Some(ReverbTail {
            convolver,
            branch_gain,
        })
    })
}

/// Stereo white noise shaped by exp(-3 t / decay)
fn synthesize_impulse(sample_rate: u32, decay: f64) -> AudioBuffer {
    let frames = (decay * f64::from(sample_rate)) as usize;
    let mut rng = rand::thread_rng();
    let mut samples = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let t = i as f64 / f64::from(sample_rate);
        let env = (-3.0 * t / decay).exp() as f32;
        samples.push(rng.gen_range(-1.0f32..1.0) * env);
        samples.push(rng.gen_range(-1.0f32..1.0) * env);
    }
    AudioBuffer::from_stereo(samples, sample_rate)
}

/// Riser length: clamped to [1, 2] s and snapped to whole beats
pub fn riser_duration(crossfade_duration: f64, bpm: Option<f32>) -> f64 {
    let mut dur = crossfade_duration.clamp(RISER_MIN_SECS, RISER_MAX_SECS);
    if let Some(bpm) = bpm {
        if bpm > 0.0 {
            let beat = 60.0 / f64::from(bpm);
            let beats = (dur / beat).round().max(1.0);
            dur = (beats * beat).clamp(RISER_MIN_SECS, RISER_MAX_SECS);
        }
    }
    dur
}

/// Standalone white-noise riser into the destination
fn build_riser(
    graph: &GraphHandle,
    start_time: f64,
    crossfade_duration: f64,
    bpm: Option<f32>,
) -> Option<NoiseRiser> {
    let dur = riser_duration(crossfade_duration, bpm);
    let sample_rate = graph.sample_rate();
    let frames = (dur * f64::from(sample_rate)) as usize;
    let mut rng = rand::thread_rng();
    let noise: Vec<f32> = (0..frames * 2).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    let buffer = AudioBuffer::from_stereo(noise, sample_rate);

    graph.with(|ctx| {
        let source = ctx.create_buffer_source(buffer);
        let bandpass = ctx.create_biquad(BiquadKind::Bandpass, RISER_START_HZ, 2.0);
        let gain = ctx.create_gain(RISER_GAIN_START);
        let dest = ctx.destination();
        ctx.connect(source, bandpass).ok()?;
        ctx.connect(bandpass, gain).ok()?;
        ctx.connect(gain, dest).ok()?;

        if let Some(bp) = ctx.biquad_mut(bandpass) {
            bp.frequency.set_value_at(start_time, RISER_START_HZ);
            bp.frequency
                .exponential_ramp_to(start_time, start_time + dur, RISER_TARGET_HZ);
        }
        if let Some(g) = ctx.gain_mut(gain) {
            g.gain.set_value_at(start_time, RISER_GAIN_START);
            g.gain
                .exponential_ramp_to(start_time, start_time + dur * 0.9, RISER_GAIN_PEAK);
            g.gain
                .linear_ramp_to(start_time + dur * 0.9, start_time + dur, 0.0);
        }
        if let Some(src) = ctx.source_mut(source) {
            src.start();
        }
        Some(NoiseRiser {
            source,
            bandpass,
            gain,
        })
    })
}

/// Outgoing low-pass target for a sweep intensity
pub fn sweep_out_cutoff(intensity: f32, fade_in_only: bool) -> f32 {
    let scale = if fade_in_only { 0.5 } else { 1.0 };
    2000.0 - (intensity * scale).min(1.0) * 1600.0
}

/// Incoming high-pass start frequency for a sweep intensity
pub fn sweep_in_start(intensity: f32) -> f32 {
    300.0 + 900.0 * intensity
}

/// Inline low-pass on the outgoing gain, high-pass on the incoming gain
fn build_sweep(
    graph: &GraphHandle,
    outgoing_gain: Option<NodeId>,
    incoming_gain: NodeId,
    start_time: f64,
    duration: f64,
    intensity: f32,
    fade_in_only: bool,
) -> Option<FilterSweep> {
    graph.with(|ctx| {
        let dest = ctx.destination();
        if !ctx.is_alive(incoming_gain) {
            return None;
        }

        let out_filter = outgoing_gain.filter(|&g| ctx.is_alive(g)).map(|g| {
            let filter = ctx.create_biquad(
                BiquadKind::Lowpass,
                20000.0,
                std::f32::consts::FRAC_1_SQRT_2,
            );
            ctx.disconnect_from(g, dest);
            let _ = ctx.connect(g, filter);
            let _ = ctx.connect(filter, dest);
            if let Some(b) = ctx.biquad_mut(filter) {
                b.frequency.set_value_at(start_time, 20000.0);
                b.frequency.exponential_ramp_to(
                    start_time,
                    start_time + duration,
                    sweep_out_cutoff(intensity, fade_in_only),
                );
            }
            filter
        });

        let in_filter = ctx.create_biquad(
            BiquadKind::Highpass,
            sweep_in_start(intensity),
            std::f32::consts::FRAC_1_SQRT_2,
        );
        ctx.disconnect_from(incoming_gain, dest);
        ctx.connect(incoming_gain, in_filter).ok()?;
        ctx.connect(in_filter, dest).ok()?;
        if let Some(b) = ctx.biquad_mut(in_filter) {
            b.frequency.set_value_at(start_time, sweep_in_start(intensity));
            b.frequency
                .exponential_ramp_to(start_time, start_time + duration, 20.0);
        }

        Some(FilterSweep {
            out_filter,
            in_filter,
            incoming_gain,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use segue_graph::{AudioBuffer, Sound};

    const SR: u32 = 8000;

    fn setup() -> (GraphHandle, Sound, Sound) {
        let graph = GraphHandle::new(SR);
        let buffer = AudioBuffer::from_mono(&vec![0.4; SR as usize * 30], SR);
        let outgoing = Sound::new(&graph, buffer.clone(), 1.0).unwrap();
        let incoming = Sound::new(&graph, buffer, 0.0).unwrap();
        (graph, outgoing, incoming)
    }

    fn spec_all() -> EffectsSpec {
        EffectsSpec {
            reverb_tail: true,
            noise_riser: true,
            filter_sweep: true,
            sweep_intensity: 0.6,
            bpm: Some(120.0),
            fade_in_only: false,
        }
    }

    #[test]
    fn creates_and_tears_down_all_effects() {
        let (graph, outgoing, incoming) = setup();
        let effects = TransitionEffects::create(
            &graph,
            Some(outgoing.gain_node()),
            incoming.gain_node(),
            0.0,
            3.0,
            &spec_all(),
        );
        assert!(effects.has_reverb());
        assert!(effects.has_riser());
        assert!(effects.has_sweep());

        // Render through the effect graph without incident
        graph.advance_secs(1.0);

        effects.cleanup();
        // Incoming gain is wired straight to the destination again
        graph.with(|ctx| {
            assert_eq!(ctx.output_count(incoming.gain_node()), 1);
            assert_eq!(ctx.outputs_of(incoming.gain_node())[0], ctx.destination());
        });
    }

    #[test]
    fn sweep_cutoff_formula_matches_intensity() {
        assert!((sweep_out_cutoff(0.0, false) - 2000.0).abs() < 1e-3);
        assert!((sweep_out_cutoff(1.0, false) - 400.0).abs() < 1e-3);
        assert!((sweep_out_cutoff(0.6, false) - (2000.0 - 0.6 * 1600.0)).abs() < 1e-3);
        // Fade-in-only halves the effective intensity
        assert!((sweep_out_cutoff(1.0, true) - 1200.0).abs() < 1e-3);
        assert!((sweep_in_start(0.5) - 750.0).abs() < 1e-3);
    }

    #[test]
    fn riser_duration_clamps_and_quantizes() {
        // Clamped to [1, 2]
        assert!((riser_duration(0.4, None) - 1.0).abs() < 1e-9);
        assert!((riser_duration(8.0, None) - 2.0).abs() < 1e-9);
        // 120 bpm -> 0.5 s beats: 1.7 s rounds to 3 beats = 1.5 s
        assert!((riser_duration(1.7, Some(120.0)) - 1.5).abs() < 1e-9);
        // Quantization never escapes the clamp range
        let d = riser_duration(2.0, Some(70.0));
        assert!((RISER_MIN_SECS..=RISER_MAX_SECS).contains(&d), "{d}");
    }

    #[test]
    fn fade_in_only_sweep_still_filters_incoming() {
        let (graph, _outgoing, incoming) = setup();
        let effects = TransitionEffects::create(
            &graph,
            None,
            incoming.gain_node(),
            0.0,
            3.0,
            &EffectsSpec {
                reverb_tail: true,
                noise_riser: false,
                filter_sweep: true,
                sweep_intensity: 1.0,
                bpm: None,
                fade_in_only: true,
            },
        );
        // No outgoing gain: no reverb branch, but the incoming side sweeps
        assert!(!effects.has_reverb());
        assert!(effects.has_sweep());
        effects.cleanup();
    }

    #[test]
    fn reverb_holds_then_fades_branch_gain() {
        let (graph, outgoing, incoming) = setup();
        let effects = TransitionEffects::create(
            &graph,
            Some(outgoing.gain_node()),
            incoming.gain_node(),
            0.0,
            2.0,
            &EffectsSpec {
                reverb_tail: true,
                noise_riser: false,
                filter_sweep: false,
                sweep_intensity: 0.0,
                bpm: None,
                fade_in_only: false,
            },
        );
        assert!(effects.has_reverb());
        // Render past the end of the crossfade; the branch is silent by then
        graph.advance_secs(2.5);
        effects.cleanup();
    }
}
