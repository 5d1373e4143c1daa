//! Shared test utilities for voice session tests
//!
//! In-memory stand-ins for the audio platform and the transport. Every fake
//! records what was done to it in a shared state so tests can assert on
//! resource acquisition and release order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::Receiver;
use parley_common::codec::{AudioBuffer, encode_base64, encode_samples};
use parley_common::protocol::{
    Content, InlineData, Part, ServerContent, ServerMessage, SessionConfig, WireFrame,
};
use tokio::sync::{mpsc, watch};

use super::lifecycle::{SessionLifecycle, SessionStatus};
use super::platform::{
    AudioPlatform, InputContext, Microphone, OutputContext, ProcessCallback, ScheduledSource,
};
use super::transport::{
    EventSender, SessionEvent, TaggedEvent, Transport, TransportEvent, TransportSession,
};
use crate::error::SessionError;

/// How long async helpers wait for an event before failing the test
const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

// ========================================================================
// Payload Helpers
// ========================================================================

/// base64 PCM16 payload of `frames` samples at 0.25
pub fn pcm_payload(frames: usize) -> String {
    encode_base64(&encode_samples(&vec![0.25; frames]))
}

fn inline_part(payload: &str) -> Part {
    Part {
        text: None,
        inline_data: Some(InlineData {
            data: payload.to_string(),
            mime_type: Some("audio/pcm;rate=24000".to_string()),
        }),
    }
}

/// Server message carrying the given audio payloads
pub fn audio_message(payloads: &[String]) -> ServerMessage {
    ServerMessage {
        setup_complete: None,
        server_content: Some(ServerContent {
            model_turn: Some(Content {
                parts: payloads.iter().map(|p| inline_part(p)).collect(),
            }),
            interrupted: None,
            turn_complete: None,
        }),
    }
}

/// Server message flagged as interrupted, optionally carrying audio
pub fn interrupted_message(payloads: &[String]) -> ServerMessage {
    let mut message = audio_message(payloads);
    if let Some(content) = message.server_content.as_mut() {
        content.interrupted = Some(true);
        if payloads.is_empty() {
            content.model_turn = None;
        }
    }
    message
}

// ========================================================================
// Fake Audio Platform
// ========================================================================

/// What the fake platform does when asked for a microphone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MicBehavior {
    #[default]
    Grant,
    Deny,
    Missing,
}

/// Stop/finish flags of one fake scheduled source
#[derive(Debug, Default)]
pub struct SourceFlags {
    finished: AtomicBool,
    stopped: AtomicBool,
}

/// Observable state shared by all fake platform resources
#[derive(Default)]
pub struct PlatformState {
    pub mic: MicBehavior,
    pub fail_output: bool,
    /// Ordered log of platform calls ("mic.acquire", "input.close", ...)
    pub calls: Vec<&'static str>,
    /// Output clock in seconds
    pub clock: f64,
    /// (start, duration) of every scheduled buffer
    pub scheduled: Vec<(f64, f64)>,
    pub sources: Vec<Arc<SourceFlags>>,
    /// Process callback installed by the last connect
    pub processor: Option<ProcessCallback>,
    pub device_error: Option<String>,
}

/// In-memory audio platform
#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_microphone(mic: MicBehavior) -> Self {
        let platform = Self::new();
        platform.lock().mic = mic;
        platform
    }

    pub fn failing_output() -> Self {
        let platform = Self::new();
        platform.lock().fail_output = true;
        platform
    }

    fn lock(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == call).count()
    }

    /// Audio contexts opened and not yet closed
    pub fn open_contexts(&self) -> usize {
        (self.count("input.open") + self.count("output.open"))
            - (self.count("input.close") + self.count("output.close"))
    }

    pub fn set_microphone(&self, mic: MicBehavior) {
        self.lock().mic = mic;
    }

    pub fn set_clock(&self, seconds: f64) {
        self.lock().clock = seconds;
    }

    pub fn scheduled(&self) -> Vec<(f64, f64)> {
        self.lock().scheduled.clone()
    }

    /// Mark every scheduled source as naturally finished
    pub fn finish_all(&self) {
        for source in &self.lock().sources {
            source.finished.store(true, Ordering::SeqCst);
        }
    }

    pub fn stopped_sources(&self) -> usize {
        self.lock()
            .sources
            .iter()
            .filter(|s| s.stopped.load(Ordering::SeqCst))
            .count()
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().processor.is_some()
    }

    /// Push one capture block through the installed process callback
    pub fn feed(&self, block: &[f32]) -> bool {
        let mut state = self.lock();
        match state.processor.as_mut() {
            Some(process) => {
                process(block);
                true
            }
            None => false,
        }
    }

    /// Keep the installed process callback past its context's close
    pub fn take_processor(&self) -> Option<ProcessCallback> {
        self.lock().processor.take()
    }

    pub fn raise_device_error(&self, message: &str) {
        self.lock().device_error = Some(message.to_string());
    }
}

impl AudioPlatform for FakePlatform {
    fn acquire_microphone(&self) -> Result<Box<dyn Microphone>, SessionError> {
        let mut state = self.lock();
        state.calls.push("mic.acquire");
        match state.mic {
            MicBehavior::Grant => {
                let (_tx, rx) = crossbeam_channel::unbounded();
                Ok(Box::new(FakeMicrophone {
                    state: self.state.clone(),
                    samples: Some(rx),
                    stopped: false,
                }))
            }
            MicBehavior::Deny => Err(SessionError::MicrophoneDenied),
            MicBehavior::Missing => Err(SessionError::MicrophoneUnavailable),
        }
    }

    fn create_input_context(
        &self,
        _sample_rate: u32,
        _block_size: usize,
    ) -> Result<Box<dyn InputContext>, SessionError> {
        self.lock().calls.push("input.open");
        Ok(Box::new(FakeInput {
            state: self.state.clone(),
            closed: false,
        }))
    }

    fn create_output_context(
        &self,
        sample_rate: u32,
    ) -> Result<Box<dyn OutputContext>, SessionError> {
        let mut state = self.lock();
        if state.fail_output {
            return Err(SessionError::AudioDevice("no output device".to_string()));
        }
        state.calls.push("output.open");
        Ok(Box::new(FakeOutput {
            state: self.state.clone(),
            sample_rate,
            closed: false,
        }))
    }
}

struct FakeMicrophone {
    state: Arc<Mutex<PlatformState>>,
    samples: Option<Receiver<Vec<f32>>>,
    stopped: bool,
}

impl Microphone for FakeMicrophone {
    fn sample_rate(&self) -> u32 {
        48000
    }

    fn take_samples(&mut self) -> Option<Receiver<Vec<f32>>> {
        self.samples.take()
    }

    fn stop_tracks(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.state.lock().unwrap().calls.push("mic.stop");
        }
    }

    fn poll_error(&self) -> Option<String> {
        self.state.lock().unwrap().device_error.take()
    }
}

struct FakeInput {
    state: Arc<Mutex<PlatformState>>,
    closed: bool,
}

impl InputContext for FakeInput {
    fn connect(
        &mut self,
        microphone: &mut dyn Microphone,
        process: ProcessCallback,
    ) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::ContextClosed);
        }
        microphone.take_samples();
        let mut state = self.state.lock().unwrap();
        state.calls.push("input.connect");
        state.processor = Some(process);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::ContextClosed);
        }
        self.closed = true;
        let mut state = self.state.lock().unwrap();
        state.calls.push("input.close");
        state.processor = None;
        Ok(())
    }
}

struct FakeOutput {
    state: Arc<Mutex<PlatformState>>,
    sample_rate: u32,
    closed: bool,
}

impl OutputContext for FakeOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().clock
    }

    fn schedule(
        &mut self,
        buffer: &AudioBuffer,
        start_time: f64,
    ) -> Result<Box<dyn ScheduledSource>, SessionError> {
        if self.closed {
            return Err(SessionError::ContextClosed);
        }
        let flags = Arc::new(SourceFlags::default());
        let mut state = self.state.lock().unwrap();
        state.scheduled.push((start_time, buffer.duration()));
        state.sources.push(flags.clone());
        Ok(Box::new(FakeSource { flags }))
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::ContextClosed);
        }
        self.closed = true;
        self.state.lock().unwrap().calls.push("output.close");
        Ok(())
    }
}

struct FakeSource {
    flags: Arc<SourceFlags>,
}

impl ScheduledSource for FakeSource {
    fn is_finished(&self) -> bool {
        self.flags.finished.load(Ordering::SeqCst) || self.flags.stopped.load(Ordering::SeqCst)
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        if self.is_finished() {
            return Err(SessionError::AlreadyStopped);
        }
        self.flags.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ========================================================================
// Fake Transport
// ========================================================================

/// How the fake transport answers `connect`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Emit `Open`, then resolve
    #[default]
    Open,
    /// Fail the connect
    Fail(String),
    /// Never complete
    Pending,
}

#[derive(Default)]
pub struct TransportState {
    pub behavior: ConnectBehavior,
    pub connects: usize,
    /// Event sender of the most recent connect
    pub events: Option<EventSender>,
    pub sent: Vec<WireFrame>,
    pub closed: usize,
}

/// In-memory transport
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: ConnectBehavior) -> Self {
        let transport = Self::new();
        transport.state.lock().unwrap().behavior = behavior;
        transport
    }

    /// A session handle backed by this transport's state
    pub fn session(&self) -> Arc<dyn TransportSession> {
        Arc::new(FakeSession {
            state: self.state.clone(),
        })
    }

    pub fn sent(&self) -> Vec<WireFrame> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn last_events(&self) -> Option<EventSender> {
        self.state.lock().unwrap().events.clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        _config: &SessionConfig,
        events: EventSender,
    ) -> Result<Arc<dyn TransportSession>, SessionError> {
        let behavior = {
            let mut state = self.state.lock().unwrap();
            state.connects += 1;
            state.events = Some(events.clone());
            state.behavior.clone()
        };

        match behavior {
            ConnectBehavior::Open => {
                events.emit(TransportEvent::Open);
                Ok(self.session())
            }
            ConnectBehavior::Fail(message) => Err(SessionError::Connection(message)),
            ConnectBehavior::Pending => {
                std::future::pending::<Result<Arc<dyn TransportSession>, SessionError>>().await
            }
        }
    }
}

struct FakeSession {
    state: Arc<Mutex<TransportState>>,
}

impl TransportSession for FakeSession {
    fn send(&self, frame: WireFrame) -> Result<(), SessionError> {
        self.state.lock().unwrap().sent.push(frame);
        Ok(())
    }

    fn close(&self) {
        self.state.lock().unwrap().closed += 1;
    }
}

// ========================================================================
// Lifecycle Harness
// ========================================================================

/// A lifecycle wired to fakes, with direct access to its event channel
pub struct Harness {
    pub lifecycle: SessionLifecycle,
    pub events: mpsc::UnboundedReceiver<TaggedEvent>,
    pub status: watch::Receiver<SessionStatus>,
    pub platform: FakePlatform,
    pub transport: FakeTransport,
}

impl Harness {
    pub fn new(platform: FakePlatform, transport: FakeTransport) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(SessionStatus::default());
        let lifecycle = SessionLifecycle::new(
            Box::new(platform.clone()),
            Arc::new(transport.clone()),
            SessionConfig::default(),
            event_tx,
            status_tx,
        );
        Self {
            lifecycle,
            events,
            status,
            platform,
            transport,
        }
    }

    /// Wait for the next event on the dispatcher channel
    pub async fn next_event(&mut self) -> TaggedEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Receive and dispatch `count` events
    pub async fn pump(&mut self, count: usize) {
        for _ in 0..count {
            let event = self.next_event().await;
            self.lifecycle.handle_event(event);
        }
    }

    /// Yield until the spawned connect task has reached the transport
    pub async fn wait_for_connect(&self) {
        let connects = self.transport.connects();
        tokio::time::timeout(EVENT_TIMEOUT, async {
            while self.transport.connects() == connects {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("connect task never ran");
    }

    /// Start and dispatch the `Open` and `Resolved` events
    pub async fn connect(&mut self) {
        self.lifecycle.start();
        self.pump(2).await;
    }

    /// Deliver a transport event for the current connection
    pub fn emit(&mut self, event: TransportEvent) {
        let generation = self.lifecycle.generation();
        self.lifecycle.handle_event(TaggedEvent {
            generation,
            event: SessionEvent::Transport(event),
        });
    }

    pub fn deliver(&mut self, message: ServerMessage) {
        self.emit(TransportEvent::Message(message));
    }
}
