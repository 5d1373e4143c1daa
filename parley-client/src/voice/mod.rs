//! Voice session engine
//!
//! - `platform` / `audio`: audio capabilities and their cpal implementation
//! - `capture`: microphone blocks to uplink frames
//! - `playback`: gapless scheduling of agent audio
//! - `interruption`: barge-in handling
//! - `lifecycle`: the session state machine owning all resources
//! - `manager`: dispatcher loop and thread handle

pub mod audio;
pub mod capture;
pub mod interruption;
pub mod lifecycle;
pub mod manager;
pub mod platform;
pub mod playback;
pub mod resample;
pub mod transport;

#[cfg(test)]
pub mod testing;

pub use audio::{CpalPlatform, list_input_devices, list_output_devices};
pub use lifecycle::{LifecycleState, SessionLifecycle, SessionStatus};
pub use manager::SessionHandle;
pub use transport::{Transport, TransportEvent, TransportSession};
