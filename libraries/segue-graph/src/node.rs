//! Graph node kinds and their block processors
//!
//! All nodes process interleaved stereo blocks of exactly one render
//! quantum. Parameter automation is evaluated per frame for gains and per
//! block (k-rate) for filter coefficients.

use crate::buffer::AudioBuffer;
use crate::convolver::ConvolverState;
use crate::param::AudioParam;

/// Frames per processing block
pub const RENDER_QUANTUM: usize = 128;

/// Biquad filter response type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadKind {
    LowShelf,
    Peaking,
    HighShelf,
    Lowpass,
    Highpass,
    Bandpass,
}

/// Gain node: multiplies its input by an automatable gain
#[derive(Debug)]
pub struct GainNode {
    pub gain: AudioParam,
}

impl GainNode {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: AudioParam::new(gain),
        }
    }

    fn process(&mut self, input: &[f32], output: &mut [f32], t0: f64, sample_rate: u32) {
        let dt = 1.0 / f64::from(sample_rate);
        for frame in 0..input.len() / 2 {
            let g = self.gain.value_at(t0 + frame as f64 * dt);
            output[frame * 2] = input[frame * 2] * g;
            output[frame * 2 + 1] = input[frame * 2 + 1] * g;
        }
    }
}

/// RBJ biquad coefficients
#[derive(Debug, Clone, Copy, Default)]
struct Coeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

/// Biquad filter node with automatable frequency and gain
#[derive(Debug)]
pub struct BiquadNode {
    pub kind: BiquadKind,
    pub frequency: AudioParam,
    pub q: f32,
    /// Shelf/peaking gain in dB; ignored by lowpass/highpass/bandpass
    pub gain_db: AudioParam,
    coeffs: Coeffs,
    // Filter state, left and right
    x1: [f32; 2],
    x2: [f32; 2],
    y1: [f32; 2],
    y2: [f32; 2],
}

impl BiquadNode {
    pub fn new(kind: BiquadKind, frequency: f32, q: f32) -> Self {
        Self {
            kind,
            frequency: AudioParam::new(frequency),
            q,
            gain_db: AudioParam::new(0.0),
            coeffs: Coeffs::default(),
            x1: [0.0; 2],
            x2: [0.0; 2],
            y1: [0.0; 2],
            y2: [0.0; 2],
        }
    }

    /// Recompute coefficients for the block starting at `t0` (k-rate)
    fn update_coeffs(&mut self, t0: f64, sample_rate: u32) {
        let sr = sample_rate as f32;
        let freq = self.frequency.value_at(t0).clamp(10.0, sr * 0.45);
        let gain_db = self.gain_db.value_at(t0);
        let omega = 2.0 * std::f32::consts::PI * freq / sr;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();

        let (b0, b1, b2, a0, a1, a2);
        match self.kind {
            BiquadKind::Peaking => {
                let a = 10.0_f32.powf(gain_db / 40.0);
                let alpha = sin_omega / (2.0 * self.q);
                b0 = 1.0 + alpha * a;
                b1 = -2.0 * cos_omega;
                b2 = 1.0 - alpha * a;
                a0 = 1.0 + alpha / a;
                a1 = -2.0 * cos_omega;
                a2 = 1.0 - alpha / a;
            }
            BiquadKind::LowShelf => {
                let a = 10.0_f32.powf(gain_db / 40.0);
                let alpha =
                    sin_omega / 2.0 * ((a + 1.0 / a) * (1.0 / 0.707 - 1.0) + 2.0).sqrt();
                let beta = 2.0 * a.sqrt() * alpha;
                b0 = a * ((a + 1.0) - (a - 1.0) * cos_omega + beta);
                b1 = 2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega);
                b2 = a * ((a + 1.0) - (a - 1.0) * cos_omega - beta);
                a0 = (a + 1.0) + (a - 1.0) * cos_omega + beta;
                a1 = -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega);
                a2 = (a + 1.0) + (a - 1.0) * cos_omega - beta;
            }
            BiquadKind::HighShelf => {
                let a = 10.0_f32.powf(gain_db / 40.0);
                let alpha =
                    sin_omega / 2.0 * ((a + 1.0 / a) * (1.0 / 0.707 - 1.0) + 2.0).sqrt();
                let beta = 2.0 * a.sqrt() * alpha;
                b0 = a * ((a + 1.0) + (a - 1.0) * cos_omega + beta);
                b1 = -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega);
                b2 = a * ((a + 1.0) + (a - 1.0) * cos_omega - beta);
                a0 = (a + 1.0) - (a - 1.0) * cos_omega + beta;
                a1 = 2.0 * ((a - 1.0) - (a + 1.0) * cos_omega);
                a2 = (a + 1.0) - (a - 1.0) * cos_omega - beta;
            }
            BiquadKind::Lowpass => {
                let alpha = sin_omega / (2.0 * self.q);
                b0 = (1.0 - cos_omega) / 2.0;
                b1 = 1.0 - cos_omega;
                b2 = (1.0 - cos_omega) / 2.0;
                a0 = 1.0 + alpha;
                a1 = -2.0 * cos_omega;
                a2 = 1.0 - alpha;
            }
            BiquadKind::Highpass => {
                let alpha = sin_omega / (2.0 * self.q);
                b0 = (1.0 + cos_omega) / 2.0;
                b1 = -(1.0 + cos_omega);
                b2 = (1.0 + cos_omega) / 2.0;
                a0 = 1.0 + alpha;
                a1 = -2.0 * cos_omega;
                a2 = 1.0 - alpha;
            }
            BiquadKind::Bandpass => {
                let alpha = sin_omega / (2.0 * self.q);
                b0 = alpha;
                b1 = 0.0;
                b2 = -alpha;
                a0 = 1.0 + alpha;
                a1 = -2.0 * cos_omega;
                a2 = 1.0 - alpha;
            }
        }

        self.coeffs = Coeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        };
    }

    fn process(&mut self, input: &[f32], output: &mut [f32], t0: f64, sample_rate: u32) {
        self.update_coeffs(t0, sample_rate);
        let c = self.coeffs;
        for frame in 0..input.len() / 2 {
            for ch in 0..2 {
                let x = input[frame * 2 + ch];
                let y = c.b0 * x + c.b1 * self.x1[ch] + c.b2 * self.x2[ch]
                    - c.a1 * self.y1[ch]
                    - c.a2 * self.y2[ch];
                self.x2[ch] = self.x1[ch];
                self.x1[ch] = x;
                self.y2[ch] = self.y1[ch];
                self.y1[ch] = y;
                output[frame * 2 + ch] = y;
            }
        }
    }
}

/// Buffer playback node
#[derive(Debug)]
pub struct BufferSourceNode {
    buffer: AudioBuffer,
    playhead: usize,
    playing: bool,
    ended: bool,
}

impl BufferSourceNode {
    pub fn new(buffer: AudioBuffer) -> Self {
        Self {
            buffer,
            playhead: 0,
            playing: false,
            ended: false,
        }
    }

    pub fn start(&mut self) {
        if !self.ended {
            self.playing = true;
        }
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn stop(&mut self) {
        self.playing = false;
        self.ended = true;
    }

    pub fn seek_frames(&mut self, frame: usize) {
        self.playhead = frame.min(self.buffer.frames());
        if self.playhead < self.buffer.frames() {
            self.ended = false;
        }
    }

    pub fn playhead_frames(&self) -> usize {
        self.playhead
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    fn process(&mut self, output: &mut [f32]) {
        output.fill(0.0);
        if !self.playing {
            return;
        }
        let frames = output.len() / 2;
        let available = self.buffer.frames().saturating_sub(self.playhead);
        let take = frames.min(available);
        let src = &self.buffer.samples()[self.playhead * 2..(self.playhead + take) * 2];
        output[..take * 2].copy_from_slice(src);
        self.playhead += take;
        if take < frames {
            self.playing = false;
            self.ended = true;
        }
    }
}

/// Node kind plus processing dispatch
#[derive(Debug)]
pub enum NodeKind {
    Gain(GainNode),
    Biquad(BiquadNode),
    Convolver(ConvolverState),
    BufferSource(BufferSourceNode),
    Destination,
}

impl NodeKind {
    /// Process one block. `input` is the pre-mixed sum of all inputs.
    pub fn process(&mut self, input: &[f32], output: &mut [f32], t0: f64, sample_rate: u32) {
        match self {
            NodeKind::Gain(gain) => gain.process(input, output, t0, sample_rate),
            NodeKind::Biquad(biquad) => biquad.process(input, output, t0, sample_rate),
            NodeKind::Convolver(state) => state.process(input, output),
            NodeKind::BufferSource(source) => source.process(output),
            NodeKind::Destination => output.copy_from_slice(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(value: f32) -> Vec<f32> {
        vec![value; RENDER_QUANTUM * 2]
    }

    #[test]
    fn gain_scales_input() {
        let mut node = GainNode::new(0.5);
        let input = block(0.8);
        let mut output = block(0.0);
        node.process(&input, &mut output, 0.0, 8000);
        assert!((output[0] - 0.4).abs() < 1e-6);
        assert!((output[output.len() - 1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn gain_follows_ramp_within_block() {
        let mut node = GainNode::new(0.0);
        node.gain.set_value_at(0.0, 0.0);
        let block_secs = RENDER_QUANTUM as f64 / 8000.0;
        node.gain.linear_ramp_to(0.0, block_secs, 1.0);
        let input = block(1.0);
        let mut output = block(0.0);
        node.process(&input, &mut output, 0.0, 8000);
        assert!(output[0] < 0.02);
        assert!(output[output.len() - 2] > 0.95);
    }

    #[test]
    fn lowpass_attenuates_high_frequency() {
        let sr = 8000;
        let mut node = BiquadNode::new(BiquadKind::Lowpass, 200.0, std::f32::consts::FRAC_1_SQRT_2);
        // 3 kHz tone, well above cutoff
        let mut out_energy = 0.0;
        let mut in_energy = 0.0;
        for b in 0..20 {
            let input: Vec<f32> = (0..RENDER_QUANTUM)
                .flat_map(|i| {
                    let n = b * RENDER_QUANTUM + i;
                    let s =
                        (2.0 * std::f32::consts::PI * 3000.0 * n as f32 / sr as f32).sin();
                    [s, s]
                })
                .collect();
            let mut output = block(0.0);
            node.process(&input, &mut output, 0.0, sr);
            if b >= 2 {
                in_energy += input.iter().map(|s| s * s).sum::<f32>();
                out_energy += output.iter().map(|s| s * s).sum::<f32>();
            }
        }
        assert!(
            out_energy < in_energy * 0.01,
            "lowpass leaked: {out_energy} vs {in_energy}"
        );
    }

    #[test]
    fn peaking_at_zero_db_is_transparent() {
        let mut node = BiquadNode::new(BiquadKind::Peaking, 1100.0, 0.7);
        let input: Vec<f32> = (0..RENDER_QUANTUM)
            .flat_map(|i| {
                let s = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 8000.0).sin() * 0.5;
                [s, s]
            })
            .collect();
        let mut output = block(0.0);
        node.process(&input, &mut output, 0.0, 8000);
        for i in 8..input.len() {
            assert!((output[i] - input[i]).abs() < 1e-3);
        }
    }

    #[test]
    fn buffer_source_plays_then_ends() {
        let buffer = AudioBuffer::from_mono(&vec![0.5; RENDER_QUANTUM + 10], 8000);
        let mut node = BufferSourceNode::new(buffer);
        node.start();

        let mut output = block(0.0);
        node.process(&mut output);
        assert!((output[0] - 0.5).abs() < 1e-6);
        assert!(!node.has_ended());

        node.process(&mut output);
        assert!((output[0] - 0.5).abs() < 1e-6);
        // Remainder of the second block is silence and the source ended
        assert_eq!(output[10 * 2], 0.0);
        assert!(node.has_ended());
        assert!(!node.is_playing());
    }

    #[test]
    fn paused_source_outputs_silence_and_holds_position() {
        let buffer = AudioBuffer::from_mono(&vec![0.5; 1000], 8000);
        let mut node = BufferSourceNode::new(buffer);
        node.start();
        let mut output = block(0.0);
        node.process(&mut output);
        let pos = node.playhead_frames();

        node.pause();
        node.process(&mut output);
        assert_eq!(output[0], 0.0);
        assert_eq!(node.playhead_frames(), pos);
    }
}
