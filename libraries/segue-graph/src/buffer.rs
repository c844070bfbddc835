//! Interleaved stereo audio buffers
//!
//! All graph processing is interleaved stereo f32. Buffers are cheap to
//! clone: the sample storage is shared behind an `Arc`.

use std::sync::Arc;

/// Immutable interleaved stereo audio data plus its sample rate
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create from interleaved stereo samples (length truncated to a whole
    /// frame count)
    pub fn from_stereo(mut samples: Vec<f32>, sample_rate: u32) -> Self {
        samples.truncate(samples.len() & !1);
        Self {
            samples: Arc::new(samples),
            sample_rate,
        }
    }

    /// Create from a mono signal by duplicating each sample to both channels
    pub fn from_mono(mono: &[f32], sample_rate: u32) -> Self {
        let mut samples = Vec::with_capacity(mono.len() * 2);
        for &s in mono {
            samples.push(s);
            samples.push(s);
        }
        Self {
            samples: Arc::new(samples),
            sample_rate,
        }
    }

    /// Silent buffer of the given frame count
    pub fn silent(frames: usize, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(vec![0.0; frames * 2]),
            sample_rate,
        }
    }

    /// Interleaved stereo samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Shared handle to the sample storage (cheap to hand to a worker)
    pub fn samples_arc(&self) -> Arc<Vec<f32>> {
        Arc::clone(&self.samples)
    }

    /// Frame count (sample pairs)
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Mix down to a mono signal (mean of L and R)
    pub fn to_mono(&self) -> Vec<f32> {
        self.samples
            .chunks_exact(2)
            .map(|frame| (frame[0] + frame[1]) * 0.5)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_mono_duplicates_channels() {
        let buf = AudioBuffer::from_mono(&[0.1, -0.2], 44100);
        assert_eq!(buf.samples(), &[0.1, 0.1, -0.2, -0.2]);
        assert_eq!(buf.frames(), 2);
    }

    #[test]
    fn odd_sample_counts_truncate_to_frames() {
        let buf = AudioBuffer::from_stereo(vec![0.0, 1.0, 0.5], 48000);
        assert_eq!(buf.frames(), 1);
    }

    #[test]
    fn duration_uses_sample_rate() {
        let buf = AudioBuffer::silent(22050, 44100);
        assert!((buf.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn to_mono_averages() {
        let buf = AudioBuffer::from_stereo(vec![1.0, 0.0, 0.5, 0.5], 44100);
        assert_eq!(buf.to_mono(), vec![0.5, 0.5]);
    }
}
