//! Gapless playback scheduling
//!
//! Decoded agent audio is laid out back to back on the output context's
//! clock. The scheduler keeps a timeline cursor (`next_start_time`) and the
//! set of buffers that are scheduled or playing.

use parley_common::codec::{AudioBuffer, decode_audio};
use parley_common::VOICE_CHANNELS;
use tracing::{debug, trace};

use super::platform::{OutputContext, ScheduledSource};
use crate::error::SessionError;

/// Counters reported when a session tears down
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackStats {
    pub buffers_scheduled: u64,
    pub decode_failures: u64,
}

/// Queues decoded buffers on a monotonically advancing timeline
///
/// Invariants: the cursor is never behind the start of an in-flight
/// buffer, and the in-flight set is empty whenever the cursor is zero.
#[derive(Default)]
pub struct PlaybackScheduler {
    /// Where the next buffer begins, in seconds on the output clock
    next_start_time: f64,
    /// Buffers scheduled or playing
    in_flight: Vec<Box<dyn ScheduledSource>>,
    stats: PlaybackStats,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one inbound payload at the output context's rate and
    /// schedule it
    ///
    /// A payload that fails to decode is skipped: the cursor and the
    /// in-flight set are left untouched.
    ///
    /// # Returns
    /// The start time the buffer was scheduled at
    pub fn handle_payload(
        &mut self,
        output: &mut dyn OutputContext,
        data: &str,
    ) -> Result<f64, SessionError> {
        let buffer = match decode_audio(data, output.sample_rate(), VOICE_CHANNELS) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.stats.decode_failures += 1;
                return Err(e.into());
            }
        };

        self.schedule(output, &buffer)
    }

    /// Schedule a decoded buffer at `max(cursor, clock)`
    pub fn schedule(
        &mut self,
        output: &mut dyn OutputContext,
        buffer: &AudioBuffer,
    ) -> Result<f64, SessionError> {
        self.prune_finished();

        let start = self.next_start_time.max(output.current_time());
        if buffer.is_empty() {
            trace!("Skipping empty buffer");
            return Ok(start);
        }

        let source = output.schedule(buffer, start)?;
        self.next_start_time = start + buffer.duration();
        self.in_flight.push(source);
        self.stats.buffers_scheduled += 1;

        trace!(
            start,
            duration = buffer.duration(),
            in_flight = self.in_flight.len(),
            "Scheduled buffer"
        );
        Ok(start)
    }

    /// Drop buffers that finished playing
    pub fn prune_finished(&mut self) {
        self.in_flight.retain(|source| !source.is_finished());
    }

    /// Stop every in-flight buffer, clear the set and reset the cursor
    ///
    /// # Returns
    /// Number of buffers that were in flight
    pub fn flush(&mut self) -> usize {
        let count = self.in_flight.len();
        for mut source in self.in_flight.drain(..) {
            if let Err(e) = source.stop() {
                debug!("Ignoring stop failure: {}", e);
            }
        }
        self.next_start_time = 0.0;
        count
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }
}

// =============================================================================
// Tests
// =============================================================================
