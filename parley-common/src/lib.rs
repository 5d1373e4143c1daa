//! Parley Common Library
//!
//! Wire formats, audio constants, and the PCM codec shared by the Parley
//! voice client.

pub mod codec;
pub mod protocol;

/// Sample rate of captured microphone audio sent uplink (16kHz)
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of agent audio received downlink (24kHz)
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Number of samples in one capture block
///
/// One block is produced per processing callback invocation
/// (256ms of audio at 16kHz).
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// Number of audio channels for both directions (mono)
pub const VOICE_CHANNELS: u16 = 1;

/// Number of channels for mono audio
pub const MONO_CHANNELS: u16 = 1;

/// Number of channels for stereo audio
pub const STEREO_CHANNELS: u16 = 2;

/// MIME descriptor attached to every uplink audio frame
pub const UPLINK_MIME_TYPE: &str = "audio/pcm;rate=16000";
