//! Audio resampling between device rates and session rates
//!
//! Microphone audio is converted from the device's native rate to the 16kHz
//! uplink rate, and agent audio from 24kHz to whatever the output device
//! runs at. Uses the rubato crate for synchronous FFT-based resampling.

use audioadapter_buffers::direct::SequentialSliceOfVecs;
use rubato::{Fft, FixedSync, Resampler};

use parley_common::MONO_CHANNELS;

use crate::error::SessionError;

// =============================================================================
// Constants
// =============================================================================

/// Number of channels processed by the resampler (mono)
const MONO: usize = MONO_CHANNELS as usize;

/// Number of sub-chunks for FFT resampler (1 = lowest latency)
const RESAMPLER_SUB_CHUNKS: usize = 1;

/// Chunk length in milliseconds used by both directions
const CHUNK_MS: usize = 10;

// =============================================================================
// Helpers
// =============================================================================

/// Check if resampling is needed between two rates
pub fn needs_resampling(from_rate: u32, to_rate: u32) -> bool {
    from_rate != to_rate
}

/// Number of frames in one resampler chunk at the given rate
fn chunk_frames(rate: u32) -> usize {
    (rate as usize * CHUNK_MS / 1000).max(1)
}

fn resample_error(context: &str, err: impl std::fmt::Display) -> SessionError {
    SessionError::AudioDevice(format!("{}: {}", context, err))
}

// =============================================================================
// Mono Resampler
// =============================================================================

/// Accumulating mono resampler shared by both directions
struct MonoResampler {
    /// The rubato resampler instance
    resampler: Fft<f32>,
    /// Input samples waiting for a full chunk
    pending: Vec<f32>,
    /// Working buffer for resampler input (single channel)
    work_in: Vec<Vec<f32>>,
    /// Working buffer for resampler output (single channel)
    work_out: Vec<Vec<f32>>,
}

impl MonoResampler {
    fn new(from_rate: u32, to_rate: u32, chunk: usize, sync: FixedSync) -> Result<Self, SessionError> {
        let resampler = Fft::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            chunk,
            RESAMPLER_SUB_CHUNKS,
            MONO,
            sync,
        )
        .map_err(|e| resample_error("Failed to create resampler", e))?;

        let input_frames_max = resampler.input_frames_max();
        let output_frames_max = resampler.output_frames_max();

        Ok(Self {
            resampler,
            pending: Vec::new(),
            work_in: vec![vec![0.0; input_frames_max]],
            work_out: vec![vec![0.0; output_frames_max]],
        })
    }

    /// Feed samples, handing every resampled chunk to `emit`
    fn process(&mut self, samples: &[f32], mut emit: impl FnMut(&[f32])) -> Result<(), SessionError> {
        self.pending.extend_from_slice(samples);

        while self.pending.len() >= self.resampler.input_frames_next() {
            let frames_needed = self.resampler.input_frames_next();

            self.work_in[0][..frames_needed].copy_from_slice(&self.pending[..frames_needed]);
            self.pending.drain(..frames_needed);

            let input_adapter = SequentialSliceOfVecs::new(&self.work_in[..], MONO, frames_needed)
                .map_err(|e| resample_error("Input adapter error", e))?;

            let output_frames = self.resampler.output_frames_next();
            let mut output_adapter =
                SequentialSliceOfVecs::new_mut(&mut self.work_out[..], MONO, output_frames)
                    .map_err(|e| resample_error("Output adapter error", e))?;

            let (_, frames_written) = self
                .resampler
                .process_into_buffer(&input_adapter, &mut output_adapter, None)
                .map_err(|e| resample_error("Resampler error", e))?;

            emit(&self.work_out[0][..frames_written]);
        }

        Ok(())
    }
}

// =============================================================================
// Input Resampler (device rate -> session rate)
// =============================================================================

/// Resamples mono microphone audio to the uplink rate
///
/// Stereo devices must be downmixed by the caller before `process()`.
pub struct InputResampler {
    inner: MonoResampler,
}

impl InputResampler {
    /// Create a resampler from `device_rate` to `target_rate`
    pub fn new(device_rate: u32, target_rate: u32) -> Result<Self, SessionError> {
        // Fixed output size keeps block assembly downstream predictable
        let inner = MonoResampler::new(
            device_rate,
            target_rate,
            chunk_frames(target_rate),
            FixedSync::Output,
        )?;
        Ok(Self { inner })
    }

    /// Process device-rate samples and return whatever target-rate samples
    /// are ready. May return an empty vec while more input is needed.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, SessionError> {
        let mut output = Vec::new();
        self.inner
            .process(samples, |chunk| output.extend_from_slice(chunk))?;
        Ok(output)
    }
}

// =============================================================================
// Output Resampler (session rate -> device rate)
// =============================================================================

/// Resamples mono playback audio to the output device rate
///
/// Output is interleaved and upmixed when the device has more than one
/// channel.
pub struct OutputResampler {
    inner: MonoResampler,
    /// Number of output channels
    channels: usize,
}

impl OutputResampler {
    /// Create a resampler from `source_rate` to `device_rate`
    pub fn new(source_rate: u32, device_rate: u32, channels: usize) -> Result<Self, SessionError> {
        let inner = MonoResampler::new(
            source_rate,
            device_rate,
            chunk_frames(source_rate),
            FixedSync::Input,
        )?;
        Ok(Self {
            inner,
            channels: channels.max(1),
        })
    }

    /// Number of source frames consumed per resampler chunk
    pub fn chunk_size(&self) -> usize {
        self.inner.resampler.input_frames_next()
    }

    /// Process source-rate mono samples into interleaved device-rate samples
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, SessionError> {
        let channels = self.channels;
        let mut output = Vec::new();
        self.inner.process(samples, |chunk| {
            for &sample in chunk {
                for _ in 0..channels {
                    output.push(sample);
                }
            }
        })?;
        Ok(output)
    }
}

// =============================================================================
// Tests
// =============================================================================
