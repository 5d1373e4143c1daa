//! Barge-in handling

use tracing::debug;

use super::playback::PlaybackScheduler;

/// Cuts playback short when the agent reports an interruption
#[derive(Debug, Default)]
pub struct InterruptionController {
    interruptions: u64,
}

impl InterruptionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop all in-flight buffers and rewind the timeline
    ///
    /// After this the next buffer starts at the output context's current
    /// clock rather than after audio that will never be heard.
    pub fn interrupt(&mut self, scheduler: &mut PlaybackScheduler) -> usize {
        let stopped = scheduler.flush();
        self.interruptions += 1;
        debug!(stopped, "Playback interrupted");
        stopped
    }

    /// Number of interruptions handled so far
    pub fn interruptions(&self) -> u64 {
        self.interruptions
    }
}
