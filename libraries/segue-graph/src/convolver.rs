//! Partitioned FFT convolution
//!
//! Uniform partitioned convolution sized to the render quantum: the impulse
//! response is split into quantum-length partitions whose spectra are
//! pre-computed once, and each incoming block contributes one spectrum to a
//! frequency-domain delay line. Per block the output is the accumulated
//! spectral product, inverse-transformed, with quantum-length overlap-add.

use crate::buffer::AudioBuffer;
use crate::error::{GraphError, Result};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Streaming convolution state for one convolver node
pub struct ConvolverState {
    quantum: usize,
    fft_size: usize,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
    /// Per channel, per partition: pre-computed IR spectrum
    ir_spectra: Vec<Vec<Vec<Complex<f32>>>>,
    /// Per channel: ring of input-block spectra (index 0 = oldest slot)
    fdl: Vec<Vec<Vec<Complex<f32>>>>,
    /// Ring head: slot holding the most recent input block
    head: usize,
    /// Per channel: overlap tail carried into the next block
    overlap: Vec<Vec<f32>>,
    scratch: Vec<Complex<f32>>,
    accum: Vec<Complex<f32>>,
}

impl std::fmt::Debug for ConvolverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolverState")
            .field("quantum", &self.quantum)
            .field("partitions", &self.ir_spectra[0].len())
            .finish()
    }
}

impl ConvolverState {
    /// Build state for a stereo impulse response, partitioned at `quantum`
    pub fn new(impulse: &AudioBuffer, quantum: usize) -> Result<Self> {
        if impulse.frames() == 0 {
            return Err(GraphError::EmptyImpulseResponse);
        }

        let fft_size = quantum * 2;
        let mut planner = FftPlanner::new();
        let fft_forward = planner.plan_fft_forward(fft_size);
        let fft_inverse = planner.plan_fft_inverse(fft_size);

        let partitions = impulse.frames().div_ceil(quantum);
        tracing::debug!(partitions, quantum, "building convolver state");
        let samples = impulse.samples();

        let mut ir_spectra = vec![Vec::with_capacity(partitions); 2];
        for ch in 0..2 {
            for p in 0..partitions {
                let mut spectrum = vec![Complex::new(0.0, 0.0); fft_size];
                for i in 0..quantum {
                    let frame = p * quantum + i;
                    if frame < impulse.frames() {
                        spectrum[i].re = samples[frame * 2 + ch];
                    }
                }
                fft_forward.process(&mut spectrum);
                ir_spectra[ch].push(spectrum);
            }
        }

        Ok(Self {
            quantum,
            fft_size,
            fft_forward,
            fft_inverse,
            ir_spectra,
            fdl: vec![vec![vec![Complex::new(0.0, 0.0); fft_size]; partitions]; 2],
            head: 0,
            overlap: vec![vec![0.0; quantum]; 2],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            accum: vec![Complex::new(0.0, 0.0); fft_size],
        })
    }

    /// Convolve one interleaved stereo block of exactly `quantum` frames
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), self.quantum * 2);
        debug_assert_eq!(output.len(), self.quantum * 2);

        let partitions = self.ir_spectra[0].len();
        self.head = (self.head + 1) % partitions;

        for ch in 0..2 {
            // Forward transform of the zero-padded input block
            for c in self.scratch.iter_mut() {
                *c = Complex::new(0.0, 0.0);
            }
            for i in 0..self.quantum {
                self.scratch[i].re = input[i * 2 + ch];
            }
            self.fft_forward.process(&mut self.scratch);
            self.fdl[ch][self.head].copy_from_slice(&self.scratch);

            // Accumulate spectral products: partition p pairs with the
            // input block from p blocks ago
            for c in self.accum.iter_mut() {
                *c = Complex::new(0.0, 0.0);
            }
            for p in 0..partitions {
                let slot = (self.head + partitions - p) % partitions;
                let ir = &self.ir_spectra[ch][p];
                let inp = &self.fdl[ch][slot];
                for k in 0..self.fft_size {
                    self.accum[k] += ir[k] * inp[k];
                }
            }

            self.fft_inverse.process(&mut self.accum);
            let scale = 1.0 / self.fft_size as f32;
            for i in 0..self.quantum {
                output[i * 2 + ch] = self.accum[i].re * scale + self.overlap[ch][i];
                self.overlap[ch][i] = self.accum[self.quantum + i].re * scale;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUANTUM: usize = 128;

    fn convolve_direct(signal: &[f32], ir: &[f32], len: usize) -> Vec<f32> {
        let mut out = vec![0.0; len];
        for (n, o) in out.iter_mut().enumerate() {
            for (k, &h) in ir.iter().enumerate() {
                if n >= k && n - k < signal.len() {
                    *o += signal[n - k] * h;
                }
            }
        }
        out
    }

    #[test]
    fn identity_impulse_passes_signal_through() {
        let mut ir = vec![0.0; 64];
        ir[0] = 1.0;
        let impulse = AudioBuffer::from_mono(&ir, 8000);
        let mut state = ConvolverState::new(&impulse, QUANTUM).unwrap();

        let input: Vec<f32> = (0..QUANTUM * 2).map(|i| ((i / 2) as f32).sin()).collect();
        let mut output = vec![0.0; QUANTUM * 2];
        state.process(&input, &mut output);

        for i in 0..QUANTUM * 2 {
            assert!(
                (output[i] - input[i]).abs() < 1e-4,
                "sample {i}: {} vs {}",
                output[i],
                input[i]
            );
        }
    }

    #[test]
    fn matches_direct_convolution_across_blocks() {
        // IR longer than one partition to exercise the delay line
        let ir: Vec<f32> = (0..300).map(|i| (-(i as f32) / 60.0).exp() * 0.5).collect();
        let impulse = AudioBuffer::from_mono(&ir, 8000);
        let mut state = ConvolverState::new(&impulse, QUANTUM).unwrap();

        let signal: Vec<f32> = (0..QUANTUM * 3)
            .map(|i| ((i as f32) * 0.37).sin() * 0.8)
            .collect();
        let expected = convolve_direct(&signal, &ir, signal.len());

        let mut got = Vec::new();
        for block in signal.chunks(QUANTUM) {
            let input: Vec<f32> = block.iter().flat_map(|&s| [s, s]).collect();
            let mut output = vec![0.0; QUANTUM * 2];
            state.process(&input, &mut output);
            got.extend(output.chunks(2).map(|f| f[0]));
        }

        for i in 0..signal.len() {
            assert!(
                (got[i] - expected[i]).abs() < 1e-3,
                "sample {i}: {} vs {}",
                got[i],
                expected[i]
            );
        }
    }

    #[test]
    fn empty_impulse_is_rejected() {
        let impulse = AudioBuffer::from_stereo(Vec::new(), 8000);
        assert!(ConvolverState::new(&impulse, QUANTUM).is_err());
    }
}
