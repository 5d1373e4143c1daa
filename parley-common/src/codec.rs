//! PCM16 codec for voice audio
//!
//! Converts between f32 samples normalized to [-1.0, 1.0] and the wire
//! representation: 16-bit little-endian PCM wrapped in base64. All functions
//! are pure and stateless.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::UPLINK_MIME_TYPE;
use crate::protocol::WireFrame;

// =============================================================================
// Constants
// =============================================================================

/// Scale factor between normalized f32 samples and 16-bit PCM
const PCM16_SCALE: f32 = 32768.0;

/// Bytes per 16-bit sample
const BYTES_PER_SAMPLE: usize = 2;

// =============================================================================
// Errors
// =============================================================================

/// Errors produced while decoding inbound audio
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM16 payload has odd length: {0} bytes")]
    OddLength(usize),

    #[error("{samples} samples cannot be split into {channels} channel(s)")]
    ChannelMismatch { samples: usize, channels: u16 },

    #[error("Invalid audio format: {sample_rate}Hz with {channels} channel(s)")]
    InvalidFormat { sample_rate: u32, channels: u16 },
}

// =============================================================================
// Audio Buffer
// =============================================================================

/// A decoded block of audio ready for playback
///
/// Samples are interleaved when `channels > 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: u16,
    samples: Vec<f32>,
}

impl AudioBuffer {
    /// Create a buffer from interleaved samples
    ///
    /// Fails if the format is degenerate or the sample count does not
    /// divide evenly into the channel count.
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Result<Self, CodecError> {
        if sample_rate == 0 || channels == 0 {
            return Err(CodecError::InvalidFormat {
                sample_rate,
                channels,
            });
        }
        if samples.len() % channels as usize != 0 {
            return Err(CodecError::ChannelMismatch {
                samples: samples.len(),
                channels,
            });
        }
        Ok(Self {
            sample_rate,
            channels,
            samples,
        })
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of interleaved channels
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Raw interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Playback duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Whether the buffer holds no audio
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mono view of the buffer, averaging channels when interleaved
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels == 1 {
            return self.samples.clone();
        }
        let channels = self.channels as usize;
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

// =============================================================================
// Sample Conversion
// =============================================================================

/// Convert one normalized sample to 16-bit PCM
///
/// Scales by 32768 and saturates to the i16 range, so +1.0 maps to 32767
/// and anything beyond [-1.0, 1.0] pins to the nearest bound instead of
/// wrapping. NaN encodes as silence.
pub fn encode_sample(sample: f32) -> i16 {
    (sample * PCM16_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert one 16-bit PCM sample to a normalized f32
pub fn decode_sample(sample: i16) -> f32 {
    sample as f32 / PCM16_SCALE
}

/// Pack normalized samples as 16-bit little-endian PCM bytes
pub fn encode_samples(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        bytes.extend_from_slice(&encode_sample(sample).to_le_bytes());
    }
    bytes
}

/// Unpack 16-bit little-endian PCM bytes into normalized samples
pub fn decode_samples(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| decode_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

// =============================================================================
// Base64
// =============================================================================

/// Wrap raw bytes as base64 text
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Unwrap base64 text into raw bytes
pub fn decode_base64(text: &str) -> Result<Vec<u8>, CodecError> {
    Ok(STANDARD.decode(text)?)
}

// =============================================================================
// Frames
// =============================================================================

/// Encode a capture block as an uplink wire frame
pub fn encode_frame(samples: &[f32]) -> WireFrame {
    WireFrame {
        data: encode_base64(&encode_samples(samples)),
        mime_type: UPLINK_MIME_TYPE.to_string(),
    }
}

/// Decode a base64 PCM16 payload into a playable buffer
///
/// # Arguments
/// * `data` - base64 text carrying 16-bit little-endian PCM
/// * `sample_rate` - Rate the payload was produced at
/// * `channels` - Interleaved channel count of the payload
pub fn decode_audio(data: &str, sample_rate: u32, channels: u16) -> Result<AudioBuffer, CodecError> {
    let bytes = decode_base64(data)?;
    let samples = decode_samples(&bytes)?;
    AudioBuffer::new(sample_rate, channels, samples)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CAPTURE_BLOCK_SIZE, OUTPUT_SAMPLE_RATE};

    #[test]
    fn test_zero_block_encodes_to_zero_bytes() {
        let frame = encode_frame(&[0.0; CAPTURE_BLOCK_SIZE]);
        let bytes = decode_base64(&frame.data).unwrap();

        assert_eq!(bytes.len(), CAPTURE_BLOCK_SIZE * 2);
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
    }

    #[test]
    fn test_full_scale_positive_saturates_to_max() {
        // 1.0 * 32768 does not fit in i16; it must pin to 32767, not wrap
        let bytes = decode_base64(&encode_frame(&[1.0; 4]).data).unwrap();
        for pair in bytes.chunks_exact(2) {
            assert_eq!(i16::from_le_bytes([pair[0], pair[1]]), i16::MAX);
        }
        assert_eq!(&bytes[..2], &[0xFF, 0x7F]);
    }

    #[test]
    fn test_full_scale_negative_is_min() {
        assert_eq!(encode_sample(-1.0), i16::MIN);
        assert_eq!(encode_samples(&[-1.0]), vec![0x00, 0x80]);
    }

    #[test]
    fn test_out_of_range_samples_saturate() {
        assert_eq!(encode_sample(1.5), i16::MAX);
        assert_eq!(encode_sample(-7.0), i16::MIN);
        assert_eq!(encode_sample(f32::INFINITY), i16::MAX);
        assert_eq!(encode_sample(f32::NAN), 0);
    }

    #[test]
    fn test_half_scale_sample() {
        assert_eq!(encode_sample(0.5), 16384);
        assert_eq!(encode_sample(-0.5), -16384);
        assert_eq!(decode_sample(16384), 0.5);
    }

    #[test]
    fn test_samples_are_little_endian() {
        // 0x0102 = 258 -> 258 / 32768
        let samples = decode_samples(&[0x02, 0x01]).unwrap();
        assert_eq!(samples, vec![258.0 / 32768.0]);
    }

    #[test]
    fn test_decode_samples_rejects_odd_length() {
        assert_eq!(decode_samples(&[0, 0, 0]), Err(CodecError::OddLength(3)));
    }

    #[test]
    fn test_decode_audio_duration() {
        // 12000 samples at 24kHz is exactly half a second
        let data = encode_base64(&vec![0u8; 12000 * 2]);
        let buffer = decode_audio(&data, OUTPUT_SAMPLE_RATE, 1).unwrap();

        assert_eq!(buffer.frames(), 12000);
        assert_eq!(buffer.duration(), 0.5);
        assert_eq!(buffer.sample_rate(), OUTPUT_SAMPLE_RATE);
    }

    #[test]
    fn test_decode_audio_invalid_base64() {
        let result = decode_audio("not base64!!", OUTPUT_SAMPLE_RATE, 1);
        assert!(matches!(result, Err(CodecError::Base64(_))));
    }

    #[test]
    fn test_decode_audio_channel_mismatch() {
        // Three samples cannot form stereo frames
        let data = encode_base64(&[0u8; 6]);
        let result = decode_audio(&data, OUTPUT_SAMPLE_RATE, 2);
        assert_eq!(
            result,
            Err(CodecError::ChannelMismatch {
                samples: 3,
                channels: 2
            })
        );
    }

    #[test]
    fn test_audio_buffer_rejects_zero_rate() {
        assert!(matches!(
            AudioBuffer::new(0, 1, vec![]),
            Err(CodecError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_stereo_buffer_to_mono() {
        let buffer = AudioBuffer::new(24000, 2, vec![0.2, 0.4, -1.0, 1.0]).unwrap();
        assert_eq!(buffer.frames(), 2);
        let mono = buffer.to_mono();
        assert!((mono[0] - 0.3).abs() < f32::EPSILON);
        assert_eq!(mono[1], 0.0);
    }

    #[test]
    fn test_sample_conversion_preserves_pcm_values() {
        let original = [0.0, 0.25, -0.25, 0.999, -1.0];
        let decoded = decode_samples(&encode_samples(&original)).unwrap();
        for (a, b) in original.iter().zip(decoded.iter()) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{} vs {}", a, b);
        }
    }
}
