//! Capture encoding: microphone blocks to uplink frames
//!
//! Runs on the input context's worker thread. The encoder only holds an
//! [`UplinkSlot`] and its own counters, so it can never reach playback state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use parley_common::codec::encode_frame;
use tracing::trace;

use super::platform::ProcessCallback;
use super::transport::TransportSession;

// =============================================================================
// Uplink Slot
// =============================================================================

/// Shared handle to the current transport session
///
/// Empty until the pending connect resolves, and cleared on teardown.
#[derive(Clone, Default)]
pub struct UplinkSlot {
    inner: Arc<RwLock<Option<Arc<dyn TransportSession>>>>,
}

impl UplinkSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the resolved session, replacing any previous one
    pub fn set(&self, session: Arc<dyn TransportSession>) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(session);
    }

    /// Remove and return the current session
    pub fn take(&self) -> Option<Arc<dyn TransportSession>> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        guard.take()
    }

    /// Current session, if resolved
    ///
    /// Never blocks: while the slot is being swapped this returns None.
    pub fn current(&self) -> Option<Arc<dyn TransportSession>> {
        match self.inner.try_read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        }
    }

    #[cfg(test)]
    pub fn is_resolved(&self) -> bool {
        self.current().is_some()
    }
}

// =============================================================================
// Capture Encoder
// =============================================================================

/// Frame counters shared with the session for teardown logging
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl CaptureStats {
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

/// What happened to one captured block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Sent,
    Dropped,
}

/// Turns capture blocks into wire frames and sends them fire-and-forget
#[derive(Clone)]
pub struct CaptureEncoder {
    uplink: UplinkSlot,
    stats: Arc<CaptureStats>,
}

impl CaptureEncoder {
    pub fn new(uplink: UplinkSlot) -> Self {
        Self {
            uplink,
            stats: Arc::new(CaptureStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        self.stats.clone()
    }

    /// Encode and send one block
    ///
    /// The block is dropped when no session is resolved or the send fails.
    pub fn process_block(&self, block: &[f32]) -> FrameOutcome {
        let Some(session) = self.uplink.current() else {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            trace!(samples = block.len(), "No session resolved, dropping frame");
            return FrameOutcome::Dropped;
        };

        match session.send(encode_frame(block)) {
            Ok(()) => {
                self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                FrameOutcome::Sent
            }
            Err(e) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Uplink send failed: {}", e);
                FrameOutcome::Dropped
            }
        }
    }

    /// Wrap the encoder as an input context process callback
    pub fn into_processor(self) -> ProcessCallback {
        Box::new(move |block: &[f32]| {
            self.process_block(block);
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::testing::FakeTransport;
    use parley_common::codec::{decode_base64, decode_samples};
    use parley_common::{CAPTURE_BLOCK_SIZE, UPLINK_MIME_TYPE};

    #[test]
    fn test_frames_dropped_without_session() {
        let encoder = CaptureEncoder::new(UplinkSlot::new());

        assert_eq!(
            encoder.process_block(&[0.0; CAPTURE_BLOCK_SIZE]),
            FrameOutcome::Dropped
        );
        assert_eq!(encoder.stats().frames_dropped(), 1);
        assert_eq!(encoder.stats().frames_sent(), 0);
    }

    #[test]
    fn test_frames_sent_once_resolved() {
        let transport = FakeTransport::new();
        let slot = UplinkSlot::new();
        let encoder = CaptureEncoder::new(slot.clone());

        encoder.process_block(&[0.0; CAPTURE_BLOCK_SIZE]);
        slot.set(transport.session());
        assert_eq!(
            encoder.process_block(&[0.5; CAPTURE_BLOCK_SIZE]),
            FrameOutcome::Sent
        );

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].mime_type, UPLINK_MIME_TYPE);

        let samples = decode_samples(&decode_base64(&sent[0].data).unwrap()).unwrap();
        assert_eq!(samples.len(), CAPTURE_BLOCK_SIZE);
        assert_eq!(samples[0], 0.5);
    }

    #[test]
    fn test_cleared_slot_drops_again() {
        let transport = FakeTransport::new();
        let slot = UplinkSlot::new();
        slot.set(transport.session());
        assert!(slot.is_resolved());

        let encoder = CaptureEncoder::new(slot.clone());
        encoder.process_block(&[0.1; 16]);
        slot.take();
        encoder.process_block(&[0.1; 16]);

        let stats = encoder.stats();
        assert_eq!(stats.frames_sent(), 1);
        assert_eq!(stats.frames_dropped(), 1);
        assert!(!slot.is_resolved());
    }

    #[test]
    fn test_processor_forwards_blocks() {
        let transport = FakeTransport::new();
        let slot = UplinkSlot::new();
        slot.set(transport.session());

        let mut processor = CaptureEncoder::new(slot).into_processor();
        processor(&[0.0; CAPTURE_BLOCK_SIZE]);
        processor(&[0.0; CAPTURE_BLOCK_SIZE]);

        assert_eq!(transport.sent().len(), 2);
    }
}
