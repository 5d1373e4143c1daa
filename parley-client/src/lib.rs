//! Parley: real-time duplex voice session client
//!
//! Streams microphone audio to a remote speech agent and plays its replies
//! back gaplessly, cutting playback short when the agent reports a barge-in.

pub mod args;
pub mod config;
pub mod error;
pub mod network;
pub mod voice;

pub use error::SessionError;
