//! Platform audio capabilities
//!
//! The session engine never talks to audio hardware directly. It acquires a
//! microphone and two audio contexts through [`AudioPlatform`]: an input
//! context that slices microphone audio into fixed-size blocks for the
//! capture callback, and an output context with a monotonic clock on which
//! decoded buffers are scheduled.
//!
//! None of these traits require `Send`: the cpal implementation holds
//! streams that must stay on the session thread.

use crossbeam_channel::Receiver;
use parley_common::codec::AudioBuffer;

use crate::error::SessionError;

/// Callback invoked once per captured block of samples
///
/// Runs on the input context's own thread, never on the session thread.
pub type ProcessCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Factory for the audio resources a session needs
pub trait AudioPlatform {
    /// Acquire the microphone
    ///
    /// Fails with [`SessionError::MicrophoneDenied`] when the platform
    /// refuses access and [`SessionError::MicrophoneUnavailable`] when no
    /// input device exists.
    fn acquire_microphone(&self) -> Result<Box<dyn Microphone>, SessionError>;

    /// Create the capture context delivering `block_size` samples per
    /// callback at `sample_rate`
    fn create_input_context(
        &self,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Box<dyn InputContext>, SessionError>;

    /// Create the playback context running at `sample_rate`
    fn create_output_context(&self, sample_rate: u32)
    -> Result<Box<dyn OutputContext>, SessionError>;
}

/// A live microphone stream
pub trait Microphone {
    /// Native rate of the raw samples
    fn sample_rate(&self) -> u32;

    /// Take the raw mono sample stream (single consumer)
    fn take_samples(&mut self) -> Option<Receiver<Vec<f32>>>;

    /// Stop all tracks; further calls are no-ops
    fn stop_tracks(&mut self);

    /// Asynchronous device failure, if one occurred
    fn poll_error(&self) -> Option<String> {
        None
    }
}

/// Capture-side audio context
pub trait InputContext {
    /// Start routing microphone audio through `process`
    fn connect(
        &mut self,
        microphone: &mut dyn Microphone,
        process: ProcessCallback,
    ) -> Result<(), SessionError>;

    /// Close the context; errors with [`SessionError::ContextClosed`] if it
    /// was already closed
    fn close(&mut self) -> Result<(), SessionError>;

    /// Asynchronous device failure, if one occurred
    fn poll_error(&self) -> Option<String> {
        None
    }
}

/// Playback-side audio context
pub trait OutputContext {
    /// Rate buffers are expected to be decoded at
    fn sample_rate(&self) -> u32;

    /// Current position of the output clock in seconds
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to start at `start_time` on the output clock
    fn schedule(
        &mut self,
        buffer: &AudioBuffer,
        start_time: f64,
    ) -> Result<Box<dyn ScheduledSource>, SessionError>;

    /// Close the context; errors with [`SessionError::ContextClosed`] if it
    /// was already closed
    fn close(&mut self) -> Result<(), SessionError>;

    /// Asynchronous device failure, if one occurred
    fn poll_error(&self) -> Option<String> {
        None
    }
}

/// A buffer scheduled on an output context
pub trait ScheduledSource {
    /// Whether playback ended, naturally or by `stop()`
    fn is_finished(&self) -> bool;

    /// Cut playback short
    ///
    /// Errors with [`SessionError::AlreadyStopped`] when the source already
    /// finished; callers treat that as harmless.
    fn stop(&mut self) -> Result<(), SessionError>;
}
