//! Audio context: node arena, wiring, and the pull renderer
//!
//! The context renders in fixed 128-frame quanta pulled from the
//! destination. `current_time()` is the rendered-sample clock; everything
//! audible in the engine is scheduled against it. The context is shared as
//! a `GraphHandle` (`Arc<Mutex<..>>`) so a render thread and the engine's
//! main thread can both reach it.

use crate::buffer::AudioBuffer;
use crate::convolver::ConvolverState;
use crate::error::{GraphError, Result};
use crate::node::{BiquadKind, BiquadNode, BufferSourceNode, GainNode, NodeKind, RENDER_QUANTUM};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Handle to one node in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

struct NodeSlot {
    kind: Option<NodeKind>,
    generation: u32,
    inputs: Vec<NodeId>,
    outputs: Vec<NodeId>,
}

/// The audio graph and its sample clock
pub struct AudioContext {
    sample_rate: u32,
    nodes: Vec<NodeSlot>,
    free: Vec<u32>,
    destination: NodeId,
    time_samples: u64,
    /// Leftover rendered samples when callers ask for non-quantum sizes
    spill: Vec<f32>,
}

impl AudioContext {
    /// Create a context with its destination node
    pub fn new(sample_rate: u32) -> Self {
        let mut ctx = Self {
            sample_rate,
            nodes: Vec::new(),
            free: Vec::new(),
            destination: NodeId {
                index: 0,
                generation: 0,
            },
            time_samples: 0,
            spill: Vec::new(),
        };
        ctx.destination = ctx.insert(NodeKind::Destination);
        ctx
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Seconds of audio rendered so far
    pub fn current_time(&self) -> f64 {
        self.time_samples as f64 / f64::from(self.sample_rate)
    }

    /// The destination (output) node
    pub fn destination(&self) -> NodeId {
        self.destination
    }

    // ===== Node management =====

    fn insert(&mut self, kind: NodeKind) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.nodes[index as usize];
            slot.generation += 1;
            slot.kind = Some(kind);
            slot.inputs.clear();
            slot.outputs.clear();
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.nodes.len() as u32;
            self.nodes.push(NodeSlot {
                kind: Some(kind),
                generation: 0,
                inputs: Vec::new(),
                outputs: Vec::new(),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    fn slot(&self, id: NodeId) -> Option<&NodeSlot> {
        self.nodes
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation && s.kind.is_some())
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut NodeSlot> {
        self.nodes
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation && s.kind.is_some())
    }

    /// Whether the id refers to a live node
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.slot(id).is_some()
    }

    pub fn create_gain(&mut self, gain: f32) -> NodeId {
        self.insert(NodeKind::Gain(GainNode::new(gain)))
    }

    pub fn create_biquad(&mut self, kind: BiquadKind, frequency: f32, q: f32) -> NodeId {
        self.insert(NodeKind::Biquad(BiquadNode::new(kind, frequency, q)))
    }

    pub fn create_convolver(&mut self, impulse: &AudioBuffer) -> Result<NodeId> {
        let state = ConvolverState::new(impulse, RENDER_QUANTUM)?;
        Ok(self.insert(NodeKind::Convolver(state)))
    }

    pub fn create_buffer_source(&mut self, buffer: AudioBuffer) -> NodeId {
        self.insert(NodeKind::BufferSource(BufferSourceNode::new(buffer)))
    }

    /// Disconnect everything and free the node
    pub fn remove_node(&mut self, id: NodeId) {
        let Some(slot) = self.slot(id) else { return };
        let inputs = slot.inputs.clone();
        let outputs = slot.outputs.clone();
        for from in inputs {
            if let Some(s) = self.slot_mut(from) {
                s.outputs.retain(|n| *n != id);
            }
        }
        for to in outputs {
            if let Some(s) = self.slot_mut(to) {
                s.inputs.retain(|n| *n != id);
            }
        }
        if let Some(slot) = self.nodes.get_mut(id.index as usize) {
            slot.kind = None;
            slot.inputs.clear();
            slot.outputs.clear();
            self.free.push(id.index);
        }
    }

    // ===== Wiring =====

    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        if self.slot(from).is_none() {
            return Err(GraphError::NoSuchNode(from));
        }
        if self.slot(to).is_none() {
            return Err(GraphError::NoSuchNode(to));
        }
        let out = &mut self.slot_mut(from).expect("checked above").outputs;
        if !out.contains(&to) {
            out.push(to);
        }
        let inp = &mut self.slot_mut(to).expect("checked above").inputs;
        if !inp.contains(&from) {
            inp.push(from);
        }
        Ok(())
    }

    /// Remove every outgoing connection of `from`
    pub fn disconnect(&mut self, from: NodeId) {
        let Some(slot) = self.slot(from) else { return };
        let outputs = slot.outputs.clone();
        for to in outputs {
            if let Some(s) = self.slot_mut(to) {
                s.inputs.retain(|n| *n != from);
            }
        }
        if let Some(s) = self.slot_mut(from) {
            s.outputs.clear();
        }
    }

    /// Remove one connection
    pub fn disconnect_from(&mut self, from: NodeId, to: NodeId) {
        if let Some(s) = self.slot_mut(from) {
            s.outputs.retain(|n| *n != to);
        }
        if let Some(s) = self.slot_mut(to) {
            s.inputs.retain(|n| *n != from);
        }
    }

    /// Number of nodes `id` feeds into
    pub fn output_count(&self, id: NodeId) -> usize {
        self.slot(id).map_or(0, |s| s.outputs.len())
    }

    /// The nodes `id` feeds into
    pub fn outputs_of(&self, id: NodeId) -> Vec<NodeId> {
        self.slot(id).map_or_else(Vec::new, |s| s.outputs.clone())
    }

    // ===== Typed access =====

    pub fn gain_mut(&mut self, id: NodeId) -> Option<&mut GainNode> {
        match self.slot_mut(id)?.kind.as_mut()? {
            NodeKind::Gain(g) => Some(g),
            _ => None,
        }
    }

    pub fn biquad_mut(&mut self, id: NodeId) -> Option<&mut BiquadNode> {
        match self.slot_mut(id)?.kind.as_mut()? {
            NodeKind::Biquad(b) => Some(b),
            _ => None,
        }
    }

    pub fn source_mut(&mut self, id: NodeId) -> Option<&mut BufferSourceNode> {
        match self.slot_mut(id)?.kind.as_mut()? {
            NodeKind::BufferSource(s) => Some(s),
            _ => None,
        }
    }

    pub fn source(&self, id: NodeId) -> Option<&BufferSourceNode> {
        match self.slot(id)?.kind.as_ref()? {
            NodeKind::BufferSource(s) => Some(s),
            _ => None,
        }
    }

    // ===== Rendering =====

    fn render_quantum(&mut self) -> Vec<f32> {
        let t0 = self.current_time();
        let mut memo: HashMap<NodeId, Vec<f32>> = HashMap::new();
        let mut visiting: HashSet<NodeId> = HashSet::new();
        let out = self.pull(self.destination, t0, &mut memo, &mut visiting);
        self.time_samples += RENDER_QUANTUM as u64;
        out
    }

    fn pull(
        &mut self,
        id: NodeId,
        t0: f64,
        memo: &mut HashMap<NodeId, Vec<f32>>,
        visiting: &mut HashSet<NodeId>,
    ) -> Vec<f32> {
        if let Some(cached) = memo.get(&id) {
            return cached.clone();
        }
        if !visiting.insert(id) {
            // Cycle guard: feed silence back into the loop
            return vec![0.0; RENDER_QUANTUM * 2];
        }

        let inputs = self.slot(id).map_or_else(Vec::new, |s| s.inputs.clone());
        let mut mix = vec![0.0; RENDER_QUANTUM * 2];
        for input in inputs {
            let rendered = self.pull(input, t0, memo, visiting);
            for (acc, s) in mix.iter_mut().zip(rendered.iter()) {
                *acc += s;
            }
        }

        let sample_rate = self.sample_rate;
        let mut out = vec![0.0; RENDER_QUANTUM * 2];
        if let Some(slot) = self.slot_mut(id) {
            if let Some(kind) = slot.kind.as_mut() {
                kind.process(&mix, &mut out, t0, sample_rate);
            }
        }

        visiting.remove(&id);
        memo.insert(id, out.clone());
        out
    }

    /// Render interleaved stereo into `out` (any even length)
    pub fn render(&mut self, out: &mut [f32]) {
        let mut filled = 0;
        while filled < out.len() {
            if self.spill.is_empty() {
                self.spill = self.render_quantum();
            }
            let take = (out.len() - filled).min(self.spill.len());
            out[filled..filled + take].copy_from_slice(&self.spill[..take]);
            self.spill.drain(..take);
            filled += take;
        }
    }

    /// Render and discard `frames` frames (advances the clock)
    pub fn render_discard(&mut self, frames: usize) {
        let mut scratch = vec![0.0; frames * 2];
        self.render(&mut scratch);
    }
}

/// Cloneable, thread-safe handle to a shared `AudioContext`
#[derive(Clone)]
pub struct GraphHandle {
    inner: Arc<Mutex<AudioContext>>,
}

impl GraphHandle {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AudioContext::new(sample_rate))),
        }
    }

    /// Run a closure with exclusive access to the context
    pub fn with<R>(&self, f: impl FnOnce(&mut AudioContext) -> R) -> R {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn current_time(&self) -> f64 {
        self.with(|ctx| ctx.current_time())
    }

    pub fn sample_rate(&self) -> u32 {
        self.with(|ctx| ctx.sample_rate())
    }

    pub fn destination(&self) -> NodeId {
        self.with(|ctx| ctx.destination())
    }

    pub fn render(&self, out: &mut [f32]) {
        self.with(|ctx| ctx.render(out));
    }

    /// Advance the clock by whole seconds' worth of frames, discarding audio
    pub fn advance_secs(&self, secs: f64) {
        let frames = (secs * f64::from(self.sample_rate())) as usize;
        self.with(|ctx| ctx.render_discard(frames));
    }
}

impl std::fmt::Debug for GraphHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GraphHandle")
    }
}
