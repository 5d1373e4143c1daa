//! Voice session lifecycle
//!
//! `Idle → Connecting → Connected → {Idle, Error}`. The lifecycle owns every
//! resource a session holds (microphone, both audio contexts, the uplink
//! slot, the pending connect task) along with the playback scheduler and
//! the interruption controller. It is driven from a single dispatcher loop,
//! so none of its methods need locking.

use std::sync::Arc;

use parley_common::protocol::{ServerMessage, SessionConfig};
use parley_common::{CAPTURE_BLOCK_SIZE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::capture::{CaptureEncoder, CaptureStats, UplinkSlot};
use super::interruption::InterruptionController;
use super::platform::{AudioPlatform, InputContext, Microphone, OutputContext};
use super::playback::PlaybackScheduler;
use super::transport::{EventSender, SessionEvent, TaggedEvent, Transport, TransportEvent};
use crate::error::SessionError;

// =============================================================================
// Status
// =============================================================================

/// Externally visible lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LifecycleState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Error,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Error => "ERROR",
        }
    }

    /// Whether the session holds live resources
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State plus the user-facing error message, if any
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: LifecycleState,
    pub error: Option<String>,
}

impl SessionStatus {
    pub fn new(state: LifecycleState) -> Self {
        Self { state, error: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            state: LifecycleState::Error,
            error: Some(message.into()),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error {
            Some(message) => write!(f, "{}: {}", self.state, message),
            None => write!(f, "{}", self.state),
        }
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Owns a voice session and every resource it acquires
pub struct SessionLifecycle {
    platform: Box<dyn AudioPlatform>,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    /// Sender cloned into each connect attempt
    events: mpsc::UnboundedSender<TaggedEvent>,
    status: watch::Sender<SessionStatus>,
    /// Bumped on every start and teardown; older events are stale
    generation: u64,
    microphone: Option<Box<dyn Microphone>>,
    input: Option<Box<dyn InputContext>>,
    output: Option<Box<dyn OutputContext>>,
    /// Replaced on every start so a stale capture worker can't reach a new session
    uplink: UplinkSlot,
    connect_task: Option<JoinHandle<()>>,
    scheduler: PlaybackScheduler,
    interruption: InterruptionController,
    capture_stats: Option<Arc<CaptureStats>>,
}

impl SessionLifecycle {
    /// Create an idle lifecycle
    ///
    /// # Arguments
    /// * `platform` - Source of the microphone and audio contexts
    /// * `transport` - Opens sessions with the remote agent
    /// * `config` - Setup sent once per connect
    /// * `events` - Sender side of the dispatcher's event channel
    /// * `status` - Where status changes are published
    pub fn new(
        platform: Box<dyn AudioPlatform>,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        events: mpsc::UnboundedSender<TaggedEvent>,
        status: watch::Sender<SessionStatus>,
    ) -> Self {
        status.send_replace(SessionStatus::default());
        Self {
            platform,
            transport,
            config,
            events,
            status,
            generation: 0,
            microphone: None,
            input: None,
            output: None,
            uplink: UplinkSlot::new(),
            connect_task: None,
            scheduler: PlaybackScheduler::new(),
            interruption: InterruptionController::new(),
            capture_stats: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.status.borrow().state
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn interruptions(&self) -> u64 {
        self.interruption.interruptions()
    }

    fn set_status(&self, status: SessionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            info!("Session {}", status);
            *current = status;
            true
        });
    }

    // =========================================================================
    // Start
    // =========================================================================

    /// Begin a session
    ///
    /// No-op while connecting or connected. The microphone is acquired
    /// before anything else, so a refused microphone leaves nothing behind.
    pub fn start(&mut self) {
        let state = self.state();
        if state.is_active() {
            debug!("Ignoring start while {}", state);
            return;
        }

        let microphone = match self.platform.acquire_microphone() {
            Ok(microphone) => microphone,
            Err(e) => {
                warn!("Microphone acquisition failed: {}", e);
                self.set_status(SessionStatus::error(e.user_message()));
                return;
            }
        };

        self.microphone = Some(microphone);
        self.generation += 1;
        // Encoders from earlier attempts keep their own, already emptied slot
        self.uplink = UplinkSlot::new();
        self.set_status(SessionStatus::new(LifecycleState::Connecting));

        if let Err(e) = self.open_contexts() {
            self.fail(e);
            return;
        }

        self.spawn_connect();
    }

    fn open_contexts(&mut self) -> Result<(), SessionError> {
        self.input = Some(
            self.platform
                .create_input_context(INPUT_SAMPLE_RATE, CAPTURE_BLOCK_SIZE)?,
        );
        self.output = Some(self.platform.create_output_context(OUTPUT_SAMPLE_RATE)?);
        Ok(())
    }

    /// Run the connect in its own task so stop() stays serviceable
    fn spawn_connect(&mut self) {
        let transport = self.transport.clone();
        let config = self.config.clone();
        let events = EventSender::new(self.generation, self.events.clone());

        debug!(generation = self.generation, model = %config.model, "Connecting");

        self.connect_task = Some(tokio::spawn(async move {
            match transport.connect(&config, events.clone()).await {
                Ok(session) => {
                    if !events.resolve(session.clone()) {
                        session.close();
                    }
                }
                Err(e) => {
                    events.emit(TransportEvent::Error(e.to_string()));
                }
            }
        }));
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Apply one event from the dispatcher channel
    pub fn handle_event(&mut self, tagged: TaggedEvent) {
        if tagged.generation != self.generation {
            debug!(
                event_generation = tagged.generation,
                generation = self.generation,
                "Ignoring stale event"
            );
            if let SessionEvent::Resolved(session) = tagged.event {
                session.close();
            }
            return;
        }

        match tagged.event {
            SessionEvent::Resolved(session) => {
                self.connect_task = None;
                if self.state().is_active() {
                    self.uplink.set(session);
                } else {
                    session.close();
                }
            }
            SessionEvent::Transport(TransportEvent::Open) => self.on_open(),
            SessionEvent::Transport(TransportEvent::Message(message)) => {
                self.on_message(&message)
            }
            SessionEvent::Transport(TransportEvent::Error(message)) => {
                warn!("Transport error: {}", message);
                self.fail(SessionError::Connection(message));
            }
            SessionEvent::Transport(TransportEvent::Close) => {
                info!("Transport closed");
                self.stop();
            }
        }
    }

    /// The only place capture gets wired into the input context
    fn on_open(&mut self) {
        if self.state() != LifecycleState::Connecting {
            debug!("Ignoring open while {}", self.state());
            return;
        }

        let encoder = CaptureEncoder::new(self.uplink.clone());
        let stats = encoder.stats();

        let wired = match (self.input.as_mut(), self.microphone.as_mut()) {
            (Some(input), Some(microphone)) => {
                input.connect(microphone.as_mut(), encoder.into_processor())
            }
            _ => Err(SessionError::AudioDevice(
                "Capture resources missing".to_string(),
            )),
        };

        if let Err(e) = wired {
            self.fail(e);
            return;
        }

        self.capture_stats = Some(stats);
        self.set_status(SessionStatus::new(LifecycleState::Connected));
    }

    /// Route an agent message to interruption and playback
    ///
    /// An interruption is applied before the audio carried by the same
    /// message, so that audio starts at the current output clock.
    fn on_message(&mut self, message: &ServerMessage) {
        let Some(output) = self.output.as_mut() else {
            debug!("Dropping message without an output context");
            return;
        };

        if message.is_interrupted() {
            self.interruption.interrupt(&mut self.scheduler);
        }

        for payload in message.audio_payloads() {
            if let Err(e) = self.scheduler.handle_payload(output.as_mut(), payload) {
                warn!("Skipping audio payload: {}", e);
            }
        }

        if let Some(text) = message.text() {
            debug!(%text, "Agent text");
        }
        if message.is_turn_complete() {
            debug!("Agent turn complete");
        }
    }

    /// Periodic check for device failures; also prunes finished buffers
    pub fn check_devices(&mut self) {
        if !self.state().is_active() {
            return;
        }

        let failure = self
            .microphone
            .as_ref()
            .and_then(|m| m.poll_error())
            .or_else(|| self.input.as_ref().and_then(|i| i.poll_error()))
            .or_else(|| self.output.as_ref().and_then(|o| o.poll_error()));

        if let Some(message) = failure {
            warn!("Audio device failure: {}", message);
            self.fail(SessionError::AudioDevice(message));
            return;
        }

        self.scheduler.prune_finished();
    }

    // =========================================================================
    // Stop
    // =========================================================================

    /// Tear down and return to idle
    ///
    /// Idempotent and valid from any state, including mid-connect.
    pub fn stop(&mut self) {
        self.teardown();
        self.set_status(SessionStatus::new(LifecycleState::Idle));
    }

    /// Tear down and settle in the error state
    fn fail(&mut self, error: SessionError) {
        warn!("Session failed: {}", error);
        self.teardown();
        self.set_status(SessionStatus::error(error.user_message()));
    }

    /// Release everything in a fixed order; each step is skipped when its
    /// resource is absent and its failure never stops the next step
    fn teardown(&mut self) {
        self.generation += 1;

        if let Some(mut microphone) = self.microphone.take() {
            microphone.stop_tracks();
        }

        if let Some(mut input) = self.input.take()
            && let Err(e) = input.close()
        {
            warn!("Failed to close input context: {}", e);
        }

        if let Some(mut output) = self.output.take()
            && let Err(e) = output.close()
        {
            warn!("Failed to close output context: {}", e);
        }

        let flushed = self.scheduler.flush();
        if flushed > 0 {
            debug!(flushed, "Stopped in-flight buffers");
        }

        if let Some(session) = self.uplink.take() {
            session.close();
        }

        if let Some(task) = self.connect_task.take() {
            task.abort();
        }

        if let Some(stats) = self.capture_stats.take() {
            let playback = self.scheduler.stats();
            info!(
                frames_sent = stats.frames_sent(),
                frames_dropped = stats.frames_dropped(),
                buffers_scheduled = playback.buffers_scheduled,
                decode_failures = playback.decode_failures,
                interruptions = self.interruption.interruptions(),
                "Session ended"
            );
        }
    }
}

impl Drop for SessionLifecycle {
    fn drop(&mut self) {
        self.teardown();
    }
}

// =============================================================================
// Tests
// =============================================================================
