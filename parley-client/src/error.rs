//! Session error kinds and their user-facing messages

use parley_common::codec::CodecError;

// =============================================================================
// User-Facing Messages
// =============================================================================

/// Shown when the platform refuses microphone access
pub const MSG_MICROPHONE_DENIED: &str = "Microphone access denied.";

/// Shown when no input device exists
pub const MSG_MICROPHONE_UNAVAILABLE: &str = "No microphone found.";

/// Shown for any transport-level failure
pub const MSG_CONNECTION_ERROR: &str = "Connection error. Please try again.";

/// Shown when audio devices fail after the microphone was acquired
pub const MSG_AUDIO_DEVICE_ERROR: &str = "Audio device error.";

// =============================================================================
// Session Error
// =============================================================================

/// Errors raised by the voice session engine and its collaborators
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Microphone access denied")]
    MicrophoneDenied,

    #[error("Microphone not found")]
    MicrophoneUnavailable,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Failed to decode audio: {0}")]
    Decode(#[from] CodecError),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio context is closed")]
    ContextClosed,

    #[error("Playback source already stopped")]
    AlreadyStopped,

    #[error("Session runtime error: {0}")]
    Runtime(String),
}

impl SessionError {
    /// Message to surface in the presentation layer
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MicrophoneDenied => MSG_MICROPHONE_DENIED,
            Self::MicrophoneUnavailable => MSG_MICROPHONE_UNAVAILABLE,
            Self::Connection(_) | Self::Runtime(_) => MSG_CONNECTION_ERROR,
            Self::Decode(_) | Self::AudioDevice(_) | Self::ContextClosed | Self::AlreadyStopped => {
                MSG_AUDIO_DEVICE_ERROR
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
