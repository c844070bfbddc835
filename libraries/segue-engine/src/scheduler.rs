//! Sample-accurate crossfade scheduling
//!
//! Pre-computes gain-curve arrays and hands them to the graph's parameter
//! automation, so the audible ramp runs on the audio clock with no timer
//! involvement. The only timer-ish piece is `tick()`, which reports
//! completion once the context clock passes the scheduled end; it never
//! touches gains itself.

use crate::curves::{build_curve_array, crossfade_gains, curve_resolution, CurveChannel};
use crate::spectral_eq::{SpectralEq, COMPLETE_RAMP_SECS};
use segue_core::{CrossfadeParams, EngineError, Result};
use segue_graph::{GraphHandle, NodeId};

/// Cancel ramp length in seconds
const CANCEL_RAMP_SECS: f64 = 0.1;

struct Run {
    outgoing_gain: Option<NodeId>,
    incoming_gain: NodeId,
    params: CrossfadeParams,
    start_time: f64,
    duration: f64,
    outgoing_start_gain: f32,
    incoming_target: f32,
    eq: Option<SpectralEq>,
}

enum State {
    Inactive,
    Active(Run),
    Paused { run: Run, progress: f64 },
}

/// Schedules and supervises one crossfade at a time
pub struct CrossfadeScheduler {
    graph: GraphHandle,
    state: State,
    /// Adjustment of the most recently scheduled crossfade; survives
    /// completion so the finishing step can persist it
    last_adjustment: f32,
}

impl CrossfadeScheduler {
    pub fn new(graph: &GraphHandle) -> Self {
        Self {
            graph: graph.clone(),
            state: State::Inactive,
            last_adjustment: 1.0,
        }
    }

    /// Schedule gain automation for both channels
    ///
    /// The outgoing channel starts from whatever gain is currently applied
    /// (no pre-ramp pop); the incoming channel starts from zero and lands at
    /// `incoming_gain * incoming_gain_adjustment`.
    pub fn schedule_full_crossfade(
        &mut self,
        outgoing_gain: Option<NodeId>,
        incoming_gain: NodeId,
        params: CrossfadeParams,
    ) -> Result<()> {
        self.cancel();

        let now = self.graph.current_time();
        let duration = params.duration.max(0.05);
        let incoming_target = params.incoming_gain * params.incoming_gain_adjustment;
        self.last_adjustment = params.incoming_gain_adjustment;

        let outgoing_start_gain = self.graph.with(|ctx| {
            outgoing_gain
                .and_then(|g| ctx.gain_mut(g).map(|node| node.gain.value_at(now)))
                .unwrap_or(params.outgoing_gain)
        });

        let incoming_ok = self.graph.with(|ctx| {
            if let Some(node) = ctx.gain_mut(incoming_gain) {
                node.gain.set_value(now, 0.0);
                true
            } else {
                false
            }
        });
        if !incoming_ok {
            return Err(EngineError::GraphSetup("incoming gain missing".into()));
        }

        let eq = match params.spectral_crossfade {
            Some(data) => Some(SpectralEq::setup(
                &self.graph,
                outgoing_gain,
                incoming_gain,
                data,
                now,
                duration,
                params.fade_in_only,
            )?),
            None => None,
        };

        let run = Run {
            outgoing_gain,
            incoming_gain,
            params,
            start_time: now,
            duration,
            outgoing_start_gain,
            incoming_target,
            eq,
        };
        self.apply_curves(&run, 0.0, now, duration);
        self.state = State::Active(run);
        Ok(())
    }

    /// Write curve arrays for `[progress, 1]` over `remaining` seconds
    fn apply_curves(&self, run: &Run, progress: f64, start: f64, remaining: f64) {
        let resolution = curve_resolution(remaining);
        let p = &run.params;
        self.graph.with(|ctx| {
            if !p.fade_in_only {
                if let Some(gain) = run.outgoing_gain {
                    if let Some(node) = ctx.gain_mut(gain) {
                        let values = build_curve_array(
                            resolution,
                            progress,
                            1.0,
                            p.curve,
                            p.in_shape,
                            p.out_shape,
                            run.outgoing_start_gain,
                            CurveChannel::Outgoing,
                        );
                        node.gain.cancel_scheduled(start);
                        node.gain
                            .set_value_at(start, values.first().copied().unwrap_or(0.0));
                        node.gain.set_value_curve(start, remaining, values);
                    }
                }
            }
            if let Some(node) = ctx.gain_mut(run.incoming_gain) {
                let values = build_curve_array(
                    resolution,
                    progress,
                    1.0,
                    p.curve,
                    p.in_shape,
                    p.out_shape,
                    run.incoming_target,
                    CurveChannel::Incoming,
                );
                node.gain.cancel_scheduled(start);
                node.gain
                    .set_value_at(start, values.first().copied().unwrap_or(0.0));
                node.gain.set_value_curve(start, remaining, values);
            }
        });
    }

    /// (outgoing, incoming) gain values at a progress point
    pub fn crossfade_values(&self, progress: f64) -> Option<(f32, f32)> {
        let run = match &self.state {
            State::Active(run) | State::Paused { run, .. } => run,
            State::Inactive => return None,
        };
        let p = &run.params;
        let (out_vol, in_vol) = crossfade_gains(progress, p.curve, p.in_shape, p.out_shape);
        Some((
            out_vol * run.outgoing_start_gain,
            in_vol * run.incoming_target,
        ))
    }

    /// Report completion once the scheduled duration has elapsed.
    /// Tears down the EQ chains on the way out.
    pub fn tick(&mut self) -> bool {
        let now = self.graph.current_time();
        let done = matches!(&self.state, State::Active(run) if now >= run.start_time + run.duration);
        if done {
            if let State::Active(run) = std::mem::replace(&mut self.state, State::Inactive) {
                if let Some(eq) = run.eq {
                    eq.cleanup_with_reconnect();
                }
            }
        }
        done
    }

    /// Freeze the crossfade; returns the paused progress
    pub fn pause_crossfade(&mut self) -> Option<f64> {
        let run = match std::mem::replace(&mut self.state, State::Inactive) {
            State::Active(run) => run,
            other => {
                // Already paused or inactive: leave things as they were
                self.state = other;
                return None;
            }
        };
        let now = self.graph.current_time();
        let progress = ((now - run.start_time) / run.duration).clamp(0.0, 1.0);

        let (out_value, in_value) = {
            let p = &run.params;
            let (o, i) = crossfade_gains(progress, p.curve, p.in_shape, p.out_shape);
            (o * run.outgoing_start_gain, i * run.incoming_target)
        };
        self.graph.with(|ctx| {
            if !run.params.fade_in_only {
                if let Some(gain) = run.outgoing_gain {
                    if let Some(node) = ctx.gain_mut(gain) {
                        node.gain.set_value(now, out_value);
                    }
                }
            }
            if let Some(node) = ctx.gain_mut(run.incoming_gain) {
                node.gain.set_value(now, in_value);
            }
        });
        if let Some(eq) = &run.eq {
            eq.pause_at(progress, now);
        }

        self.state = State::Paused { run, progress };
        Some(progress)
    }

    /// Continue from the paused progress; the virtual start time shifts so
    /// progress is preserved
    pub fn resume_crossfade(&mut self) {
        let (mut run, progress) = match std::mem::replace(&mut self.state, State::Inactive) {
            State::Paused { run, progress } => (run, progress),
            other => {
                self.state = other;
                return;
            }
        };
        let now = self.graph.current_time();
        run.start_time = now - progress * run.duration;
        let remaining = (run.duration * (1.0 - progress)).max(0.01);
        self.apply_curves(&run, progress, now, remaining);
        if let Some(eq) = &run.eq {
            eq.resume_from(progress, now, remaining);
        }
        self.state = State::Active(run);
    }

    /// Ramp both channels to their final targets over 50 ms and let the
    /// next `tick()` report completion (used when the outgoing source ends
    /// early)
    pub fn force_complete(&mut self) {
        let state = std::mem::replace(&mut self.state, State::Inactive);
        let (State::Active(mut run) | State::Paused { mut run, .. }) = state else {
            return;
        };
        let now = self.graph.current_time();
        self.graph.with(|ctx| {
            if !run.params.fade_in_only {
                if let Some(gain) = run.outgoing_gain {
                    if let Some(node) = ctx.gain_mut(gain) {
                        node.gain.cancel_scheduled(now);
                        node.gain.linear_ramp_to(now, now + COMPLETE_RAMP_SECS, 0.0);
                    }
                }
            }
            if let Some(node) = ctx.gain_mut(run.incoming_gain) {
                node.gain.cancel_scheduled(now);
                node.gain
                    .linear_ramp_to(now, now + COMPLETE_RAMP_SECS, run.incoming_target);
            }
        });
        if let Some(eq) = &run.eq {
            eq.force_complete(now, COMPLETE_RAMP_SECS);
        }
        // Completion fires once the micro-ramp lands
        run.start_time = now + COMPLETE_RAMP_SECS - run.duration;
        self.state = State::Active(run);
    }

    /// Fast 100 ms ramp to final targets, EQ zeroed and removed
    pub fn cancel(&mut self) {
        let state = std::mem::replace(&mut self.state, State::Inactive);
        let (State::Active(run) | State::Paused { run, .. }) = state else {
            return;
        };
        let now = self.graph.current_time();
        self.graph.with(|ctx| {
            if !run.params.fade_in_only {
                if let Some(gain) = run.outgoing_gain {
                    if let Some(node) = ctx.gain_mut(gain) {
                        node.gain.cancel_scheduled(now);
                        node.gain.linear_ramp_to(now, now + CANCEL_RAMP_SECS, 0.0);
                    }
                }
            }
            if let Some(node) = ctx.gain_mut(run.incoming_gain) {
                node.gain.cancel_scheduled(now);
                node.gain
                    .linear_ramp_to(now, now + CANCEL_RAMP_SECS, run.incoming_target);
            }
        });
        if let Some(eq) = run.eq {
            eq.cancel(now);
            eq.cleanup_with_reconnect();
        }
    }

    /// Progress in [0, 1]; -1 when no crossfade is active
    pub fn get_progress(&self) -> f64 {
        match &self.state {
            State::Inactive => -1.0,
            State::Paused { progress, .. } => *progress,
            State::Active(run) => {
                let now = self.graph.current_time();
                ((now - run.start_time) / run.duration).clamp(0.0, 1.0)
            }
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Active(_))
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.state, State::Paused { .. })
    }

    /// Gain adjustment of the most recent crossfade (persisted by the
    /// finishing step so later volume changes keep normalization)
    pub fn get_incoming_gain_adjustment(&self) -> f32 {
        self.last_adjustment
    }
}
