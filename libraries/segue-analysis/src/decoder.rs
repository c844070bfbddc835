//! Blob decoding via Symphonia
//!
//! Decodes compressed bytes (MP3, FLAC, OGG, WAV, AAC, M4A) into
//! interleaved stereo f32. Multichannel sources are downmixed to stereo
//! with ITU-R BS.775-1 coefficients; mono is duplicated to both channels.

use crate::error::{AnalysisError, Result};
use std::io::Cursor;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decoded PCM plus its sample rate
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved stereo samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Frame count (sample pairs)
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

/// Decode a full byte blob into interleaved stereo PCM
pub fn decode_blob(bytes: &[u8]) -> Result<DecodedAudio> {
    let mss = MediaSourceStream::new(
        Box::new(Cursor::new(bytes.to_vec())),
        Default::default(),
    );

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AnalysisError::Probe(e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or(AnalysisError::NoAudioTrack)?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AnalysisError::Decode(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AnalysisError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => append_as_stereo(&decoded, &mut samples),
            // Skip over corrupt packets instead of failing the whole track
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(AnalysisError::Decode(e.to_string())),
        }
    }

    if samples.is_empty() {
        return Err(AnalysisError::EmptyStream);
    }

    tracing::debug!(
        frames = samples.len() / 2,
        sample_rate,
        "decoded blob"
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Convert one decoded buffer to interleaved stereo and append it
fn append_as_stereo(decoded: &AudioBufferRef, out: &mut Vec<f32>) {
    match decoded {
        AudioBufferRef::F32(buf) => downmix(buf, |s| s, out),
        AudioBufferRef::F64(buf) => downmix(buf, |s| s as f32, out),
        AudioBufferRef::S32(buf) => downmix(buf, |s| s as f32 / 2147483648.0, out),
        AudioBufferRef::S16(buf) => downmix(buf, |s| f32::from(s) / 32768.0, out),
        AudioBufferRef::S8(buf) => downmix(buf, |s| f32::from(s) / 128.0, out),
        AudioBufferRef::S24(buf) => downmix(buf, |s| s.inner() as f32 / 8388608.0, out),
        AudioBufferRef::U8(buf) => downmix(buf, |s| (f32::from(s) / 128.0) - 1.0, out),
        AudioBufferRef::U16(buf) => {
            downmix(buf, |s| (f32::from(s) / 32768.0) - 1.0, out);
        }
        AudioBufferRef::U24(buf) => {
            downmix(buf, |s| (s.inner() as f32 / 8388608.0) - 1.0, out);
        }
        AudioBufferRef::U32(buf) => {
            downmix(buf, |s| (s as f32 / 2147483648.0) - 1.0, out);
        }
    }
}

/// Interleave an N-channel planar buffer to stereo
///
/// 1 channel duplicates; 2 channels pass through; more fold center and
/// surround channels in at -3 dB (ITU-R BS.775-1).
fn downmix<T, F>(
    buf: &symphonia::core::audio::AudioBuffer<T>,
    convert: F,
    out: &mut Vec<f32>,
) where
    T: symphonia::core::sample::Sample + Copy,
    F: Fn(T) -> f32,
{
    const SIDE_MIX: f32 = 0.707;
    let channels = buf.spec().channels.count();
    let frames = buf.frames();
    out.reserve(frames * 2);

    match channels {
        0 => {}
        1 => {
            for i in 0..frames {
                let s = convert(buf.chan(0)[i]).clamp(-1.0, 1.0);
                out.push(s);
                out.push(s);
            }
        }
        2 => {
            for i in 0..frames {
                out.push(convert(buf.chan(0)[i]).clamp(-1.0, 1.0));
                out.push(convert(buf.chan(1)[i]).clamp(-1.0, 1.0));
            }
        }
        _ => {
            for i in 0..frames {
                let mut left = convert(buf.chan(0)[i]);
                let mut right = convert(buf.chan(1)[i]);
                for ch in 2..channels {
                    let s = convert(buf.chan(ch)[i]) * SIDE_MIX;
                    // Fold extra channels into the nearer side, center into both
                    if ch == 2 {
                        left += s;
                        right += s;
                    } else if ch % 2 == 0 {
                        left += s;
                    } else {
                        right += s;
                    }
                }
                out.push(left.clamp(-1.0, 1.0));
                out.push(right.clamp(-1.0, 1.0));
            }
        }
    }
}

/// Mix interleaved stereo down to mono (mean of L and R)
pub fn mixdown_mono(samples: &[f32]) -> Vec<f32> {
    samples
        .chunks_exact(2)
        .map(|frame| (frame[0] + frame[1]) * 0.5)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(mono: &[f32], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in mono {
                writer
                    .write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16)
                    .unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_wav_round_trip() {
        let mono: Vec<f32> = (0..8000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 8000.0).sin() * 0.5)
            .collect();
        let bytes = wav_bytes(&mono, 8000);
        let decoded = decode_blob(&bytes).unwrap();

        assert_eq!(decoded.sample_rate, 8000);
        assert_eq!(decoded.frames(), 8000);
        // Mono input duplicated to both channels
        assert!((decoded.samples[100 * 2] - decoded.samples[100 * 2 + 1]).abs() < 1e-6);
        // Amplitude survives 16-bit quantization
        let peak = decoded.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.01);
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        let result = decode_blob(&[0x13, 0x37, 0x00, 0x01, 0x02]);
        assert!(result.is_err());
    }

    #[test]
    fn mixdown_averages_channels() {
        assert_eq!(mixdown_mono(&[1.0, 0.0, -0.5, 0.5]), vec![0.5, 0.0]);
    }
}
