//! Voice session runner
//!
//! Runs a [`SessionLifecycle`] on a dedicated thread. User commands and
//! transport events are serialized through one dispatcher loop, so the
//! lifecycle, playback scheduler and interruption controller are only ever
//! touched from that thread.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parley_common::protocol::SessionConfig;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::lifecycle::{SessionLifecycle, SessionStatus};
use super::platform::AudioPlatform;
use super::transport::{TaggedEvent, Transport};
use crate::error::SessionError;

// =============================================================================
// Constants
// =============================================================================

/// How often device errors are polled and finished buffers pruned
const DEVICE_POLL_INTERVAL_MS: u64 = 250;

// =============================================================================
// Commands
// =============================================================================

/// Commands sent from the handle to the session thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Begin a session
    Start,
    /// End the current session, keeping the thread alive
    Stop,
    /// End the session and exit the thread
    Shutdown,
}

// =============================================================================
// Dispatcher Loop
// =============================================================================

/// Dispatch commands, transport events and device polling until shutdown
pub async fn run_session(
    mut lifecycle: SessionLifecycle,
    mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    mut event_rx: mpsc::UnboundedReceiver<TaggedEvent>,
) {
    let mut device_interval =
        tokio::time::interval(Duration::from_millis(DEVICE_POLL_INTERVAL_MS));
    device_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                match command {
                    Some(SessionCommand::Start) => lifecycle.start(),
                    Some(SessionCommand::Stop) => lifecycle.stop(),
                    Some(SessionCommand::Shutdown) | None => {
                        lifecycle.stop();
                        break;
                    }
                }
            }

            Some(event) = event_rx.recv() => {
                lifecycle.handle_event(event);
            }

            _ = device_interval.tick() => {
                lifecycle.check_devices();
            }
        }
    }

    debug!("Session dispatcher exited");
}

// =============================================================================
// Session Handle
// =============================================================================

/// Handle to a running voice session thread
///
/// Commands are fire-and-forget; observe the outcome through
/// [`SessionHandle::subscribe`].
pub struct SessionHandle {
    /// Command sender
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    /// Latest lifecycle status
    status_rx: watch::Receiver<SessionStatus>,
    /// Join handle for the session thread
    /// Using std::thread instead of tokio::spawn because cpal's Stream is not Send
    handle: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Spawn the session thread
    ///
    /// The thread runs its own current-thread tokio runtime. The lifecycle
    /// starts idle; call [`SessionHandle::start`] to connect.
    pub fn spawn<P>(
        platform: P,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Result<Self, SessionError>
    where
        P: AudioPlatform + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SessionError::Runtime(e.to_string()))?;

        let handle = std::thread::Builder::new()
            .name("parley-session".to_string())
            .spawn(move || {
                let lifecycle = SessionLifecycle::new(
                    Box::new(platform),
                    transport,
                    config,
                    event_tx,
                    status_tx,
                );
                runtime.block_on(run_session(lifecycle, command_rx, event_rx));
            })
            .map_err(|e| SessionError::Runtime(e.to_string()))?;

        info!("Voice session thread started");

        Ok(Self {
            command_tx,
            status_rx,
            handle: Some(handle),
        })
    }

    /// Begin a session (no-op while connecting or connected)
    pub fn start(&self) {
        self.send(SessionCommand::Start);
    }

    /// End the current session (idempotent)
    pub fn stop(&self) {
        self.send(SessionCommand::Stop);
    }

    /// Latest status
    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Stop the session and wait for the thread to exit
    pub fn shutdown(mut self) {
        self.send(SessionCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Voice session thread panicked");
        }
    }

    fn send(&self, command: SessionCommand) {
        if self.command_tx.send(command).is_err() {
            debug!(?command, "Session thread is gone");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        // Don't join here: audio drivers can stall and the caller may be a UI
        if self.handle.take().is_some() {
            self.send(SessionCommand::Shutdown);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
