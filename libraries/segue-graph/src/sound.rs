//! Playable sound abstraction
//!
//! A `Sound` owns one buffer source and one gain node wired
//! `source -> gain -> destination`. The engine borrows the gain node for
//! crossfade scheduling and EQ/effect insertion; unloading the sound frees
//! every node it owns.
//!
//! Events are polled, not called back: the engine drains them on its tick,
//! which keeps the render path free of user code.

use crate::buffer::AudioBuffer;
use crate::context::{GraphHandle, NodeId};
use crate::error::{GraphError, Result};
use std::collections::VecDeque;

/// Lifecycle events surfaced to the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundEvent {
    Play,
    Pause,
    /// The source ran out of samples
    End,
    /// A `fade()` ramp reached its target
    Fade,
}

/// One playable track bound to the shared graph
#[derive(Debug)]
pub struct Sound {
    graph: GraphHandle,
    source: NodeId,
    gain: NodeId,
    duration: f64,
    volume: f32,
    fade_ends_at: Option<f64>,
    end_seen: bool,
    events: VecDeque<SoundEvent>,
}

impl Sound {
    /// Create and wire a sound at the given initial volume
    pub fn new(graph: &GraphHandle, buffer: AudioBuffer, volume: f32) -> Result<Self> {
        let (source, gain, duration) = graph.with(|ctx| {
            let source = ctx.create_buffer_source(buffer);
            let gain = ctx.create_gain(volume);
            ctx.connect(source, gain)?;
            ctx.connect(gain, ctx.destination())?;
            let frames = ctx.source(source).map_or(0, |s| s.buffer().frames());
            let duration = frames as f64 / f64::from(ctx.sample_rate());
            Ok::<_, GraphError>((source, gain, duration))
        })?;
        Ok(Self {
            graph: graph.clone(),
            source,
            gain,
            duration,
            volume,
            fade_ends_at: None,
            end_seen: false,
            events: VecDeque::new(),
        })
    }

    /// Node id of this sound's gain node
    pub fn gain_node(&self) -> NodeId {
        self.gain
    }

    /// The sound's audio data (shared storage, cheap clone)
    pub fn buffer(&self) -> Option<AudioBuffer> {
        self.graph
            .with(|ctx| ctx.source(self.source).map(|s| s.buffer().clone()))
    }

    /// Duration in seconds at the context sample rate
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn play(&mut self) {
        self.graph.with(|ctx| {
            if let Some(src) = ctx.source_mut(self.source) {
                src.start();
            }
        });
        self.events.push_back(SoundEvent::Play);
    }

    pub fn pause(&mut self) {
        self.graph.with(|ctx| {
            if let Some(src) = ctx.source_mut(self.source) {
                src.pause();
            }
        });
        self.events.push_back(SoundEvent::Pause);
    }

    pub fn stop(&mut self) {
        self.graph.with(|ctx| {
            if let Some(src) = ctx.source_mut(self.source) {
                src.stop();
            }
        });
    }

    /// Seek to a position in seconds
    pub fn seek(&mut self, secs: f64) {
        let frame = (secs.max(0.0) * f64::from(self.graph.sample_rate())) as usize;
        self.graph.with(|ctx| {
            if let Some(src) = ctx.source_mut(self.source) {
                src.seek_frames(frame);
            }
        });
    }

    /// Playback position in seconds
    pub fn position(&self) -> f64 {
        let frames = self
            .graph
            .with(|ctx| ctx.source(self.source).map_or(0, |s| s.playhead_frames()));
        frames as f64 / f64::from(self.graph.sample_rate())
    }

    pub fn playing(&self) -> bool {
        self.graph
            .with(|ctx| ctx.source(self.source).is_some_and(|s| s.is_playing()))
    }

    pub fn ended(&self) -> bool {
        self.graph
            .with(|ctx| ctx.source(self.source).is_some_and(|s| s.has_ended()))
    }

    /// Set the gain immediately, discarding scheduled automation
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        self.graph.with(|ctx| {
            let now = ctx.current_time();
            if let Some(gain) = ctx.gain_mut(self.gain) {
                gain.gain.set_value(now, volume);
            }
        });
    }

    /// Last volume set through `set_volume`
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Current gain value as scheduled on the graph
    pub fn current_gain(&self) -> f32 {
        self.graph.with(|ctx| {
            let now = ctx.current_time();
            ctx.gain_mut(self.gain).map_or(0.0, |g| g.gain.value_at(now))
        })
    }

    /// Linear fade between two gains over `ms` milliseconds
    pub fn fade(&mut self, from: f32, to: f32, ms: u64) {
        let end = self.graph.with(|ctx| {
            let now = ctx.current_time();
            let end = now + ms as f64 / 1000.0;
            if let Some(gain) = ctx.gain_mut(self.gain) {
                gain.gain.cancel_scheduled(now);
                gain.gain.set_value_at(now, from);
                gain.gain.linear_ramp_to(now, end, to);
            }
            end
        });
        self.volume = to;
        self.fade_ends_at = Some(end);
    }

    /// Drain pending lifecycle events (detects source end edges)
    pub fn poll_events(&mut self) -> Vec<SoundEvent> {
        let now = self.graph.current_time();
        if !self.end_seen && self.ended() {
            self.end_seen = true;
            self.events.push_back(SoundEvent::End);
        }
        if let Some(end) = self.fade_ends_at {
            if now >= end {
                self.fade_ends_at = None;
                self.events.push_back(SoundEvent::Fade);
            }
        }
        self.events.drain(..).collect()
    }

    /// Disconnect and free this sound's nodes
    pub fn unload(mut self) {
        self.stop();
        self.graph.with(|ctx| {
            ctx.remove_node(self.source);
            ctx.remove_node(self.gain);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::RENDER_QUANTUM;

    fn graph() -> GraphHandle {
        GraphHandle::new(8000)
    }

    fn tone(secs: f64) -> AudioBuffer {
        let frames = (secs * 8000.0) as usize;
        AudioBuffer::from_mono(&vec![0.5; frames], 8000)
    }

    #[test]
    fn play_render_position() {
        let g = graph();
        let mut sound = Sound::new(&g, tone(2.0), 1.0).unwrap();
        sound.play();
        g.advance_secs(1.0);
        let pos = sound.position();
        assert!((pos - 1.0).abs() < RENDER_QUANTUM as f64 / 8000.0 + 1e-9);
        assert!(sound.playing());
    }

    #[test]
    fn end_event_fires_once() {
        let g = graph();
        let mut sound = Sound::new(&g, tone(0.1), 1.0).unwrap();
        sound.play();
        g.advance_secs(0.3);
        let events = sound.poll_events();
        assert!(events.contains(&SoundEvent::End));
        assert!(!sound.poll_events().contains(&SoundEvent::End));
    }

    #[test]
    fn fade_ramps_the_gain() {
        let g = graph();
        let mut sound = Sound::new(&g, tone(2.0), 1.0).unwrap();
        sound.play();
        sound.fade(1.0, 0.0, 1000);
        g.advance_secs(0.5);
        let mid = sound.current_gain();
        assert!((mid - 0.5).abs() < 0.05, "mid-fade gain {mid}");
        g.advance_secs(0.6);
        assert!(sound.current_gain() < 0.01);
        assert!(sound.poll_events().contains(&SoundEvent::Fade));
    }

    #[test]
    fn unload_frees_nodes() {
        let g = graph();
        let sound = Sound::new(&g, tone(1.0), 1.0).unwrap();
        let gain = sound.gain_node();
        sound.unload();
        assert!(!g.with(|ctx| ctx.is_alive(gain)));
    }

    #[test]
    fn silent_prebuffer_does_not_leak_audio() {
        let g = graph();
        let mut sound = Sound::new(&g, tone(1.0), 0.0).unwrap();
        sound.play();
        let mut out = vec![0.0; 2048];
        g.render(&mut out);
        assert!(out.iter().all(|s| s.abs() < 1e-9));
    }
}
