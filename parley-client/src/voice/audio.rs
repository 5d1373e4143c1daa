//! Audio device management and streaming
//!
//! cpal implementation of the platform audio capabilities: device
//! enumeration, microphone capture, a capture context that slices the
//! microphone stream into fixed-size blocks, and a playback context that
//! renders scheduled buffers against a sample-accurate clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Host, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parley_common::STEREO_CHANNELS;
use parley_common::codec::AudioBuffer;
use tracing::{debug, info};

use super::platform::{
    AudioPlatform, InputContext, Microphone, OutputContext, ProcessCallback, ScheduledSource,
};
use super::resample::{InputResampler, OutputResampler, needs_resampling};
use crate::error::SessionError;

// =============================================================================
// Constants
// =============================================================================

/// System default device display name
pub const SYSTEM_DEFAULT_DEVICE_NAME: &str = "System Default";

/// Raw microphone chunks held before the capture context drains them
const MAX_PENDING_CHUNKS: usize = 64;

/// How long the capture thread waits for audio before re-checking shutdown
const CAPTURE_POLL_MS: u64 = 50;

/// Sample formats we know how to convert
const SUPPORTED_FORMATS: [SampleFormat; 3] = [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16];

/// Backend error fragments that indicate the OS refused microphone access
const PERMISSION_MARKERS: &[&str] = &["permission", "denied", "not allowed", "not authorized"];

/// Backend error fragments that indicate the device is gone
const UNAVAILABLE_MARKERS: &[&str] = &["not available", "no longer available", "not found"];

// =============================================================================
// Audio Device
// =============================================================================

/// Represents an audio device (input or output)
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Device name for display
    pub name: String,
    /// Whether this represents the system default device
    pub is_default: bool,
}

impl AudioDevice {
    /// Create the system default device entry
    pub fn system_default() -> Self {
        Self {
            name: SYSTEM_DEFAULT_DEVICE_NAME.to_string(),
            is_default: true,
        }
    }
}

impl std::fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

// =============================================================================
// Device Enumeration
// =============================================================================

/// Get the default audio host for the platform
fn get_host() -> Host {
    cpal::default_host()
}

/// Build a device list with "System Default" first and no duplicates
fn device_list(devices: Option<impl Iterator<Item = Device>>) -> Vec<AudioDevice> {
    let mut list = vec![AudioDevice::system_default()];

    for device in devices.into_iter().flatten() {
        if let Ok(desc) = device.description() {
            let name = desc.name().to_string();
            if !list.iter().any(|d| d.name == name) {
                list.push(AudioDevice {
                    name,
                    is_default: false,
                });
            }
        }
    }

    list
}

/// List available audio input devices
pub fn list_input_devices() -> Vec<AudioDevice> {
    device_list(get_host().input_devices().ok())
}

/// List available audio output devices
pub fn list_output_devices() -> Vec<AudioDevice> {
    device_list(get_host().output_devices().ok())
}

/// Whether a configured name means "use the system default"
fn is_default_name(name: &str) -> bool {
    name.is_empty() || name == SYSTEM_DEFAULT_DEVICE_NAME
}

/// Find an input device by name, or return the default
fn find_input_device(name: &str) -> Option<Device> {
    let host = get_host();

    if is_default_name(name) {
        return host.default_input_device();
    }

    host.input_devices()
        .ok()?
        .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
        .or_else(|| host.default_input_device())
}

/// Find an output device by name, or return the default
fn find_output_device(name: &str) -> Option<Device> {
    let host = get_host();

    if is_default_name(name) {
        return host.default_output_device();
    }

    host.output_devices()
        .ok()?
        .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
        .or_else(|| host.default_output_device())
}

/// Map a backend error on the capture path to a session error
///
/// cpal reports permission problems as backend-specific text, so the
/// classification is done on the message.
fn classify_capture_error(err: impl std::fmt::Display) -> SessionError {
    let message = err.to_string();
    let lower = message.to_lowercase();

    if PERMISSION_MARKERS.iter().any(|m| lower.contains(m)) {
        SessionError::MicrophoneDenied
    } else if UNAVAILABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        SessionError::MicrophoneUnavailable
    } else {
        SessionError::AudioDevice(message)
    }
}

fn device_error(context: &str, err: impl std::fmt::Display) -> SessionError {
    SessionError::AudioDevice(format!("{}: {}", context, err))
}

// =============================================================================
// Platform
// =============================================================================

/// cpal-backed audio platform
#[derive(Debug, Clone, Default)]
pub struct CpalPlatform {
    /// Input device name (empty for default)
    input_device: String,
    /// Output device name (empty for default)
    output_device: String,
}

impl CpalPlatform {
    /// Create a platform bound to the named devices
    pub fn new(input_device: impl Into<String>, output_device: impl Into<String>) -> Self {
        Self {
            input_device: input_device.into(),
            output_device: output_device.into(),
        }
    }
}

impl AudioPlatform for CpalPlatform {
    fn acquire_microphone(&self) -> Result<Box<dyn Microphone>, SessionError> {
        Ok(Box::new(CpalMicrophone::open(&self.input_device)?))
    }

    fn create_input_context(
        &self,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Box<dyn InputContext>, SessionError> {
        Ok(Box::new(CpalInputContext::new(sample_rate, block_size)))
    }

    fn create_output_context(
        &self,
        sample_rate: u32,
    ) -> Result<Box<dyn OutputContext>, SessionError> {
        Ok(Box::new(CpalOutputContext::open(
            &self.output_device,
            sample_rate,
        )?))
    }
}

// =============================================================================
// Microphone
// =============================================================================

/// Live microphone stream at the device's native rate, downmixed to mono
pub struct CpalMicrophone {
    /// The cpal input stream (None once tracks are stopped)
    stream: Option<Stream>,
    /// Native sample rate of the device
    sample_rate: u32,
    /// Mono sample chunks, until taken by a capture context
    samples: Option<Receiver<Vec<f32>>>,
    /// Receiver for audio stream errors
    error_rx: std_mpsc::Receiver<String>,
}

impl CpalMicrophone {
    /// Open and start the named input device
    pub fn open(device_name: &str) -> Result<Self, SessionError> {
        let device = find_input_device(device_name).ok_or(SessionError::MicrophoneUnavailable)?;

        let supported = device
            .default_input_config()
            .map_err(classify_capture_error)?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();

        let (tx, rx) = crossbeam_channel::bounded(MAX_PENDING_CHUNKS);
        let (error_tx, error_rx) = std_mpsc::channel();

        let stream = match sample_format {
            SampleFormat::F32 => build_capture_stream::<f32>(&device, &config, tx, error_tx),
            SampleFormat::I16 => build_capture_stream::<i16>(&device, &config, tx, error_tx),
            SampleFormat::U16 => build_capture_stream::<u16>(&device, &config, tx, error_tx),
            other => {
                return Err(SessionError::AudioDevice(format!(
                    "Unsupported sample format: {:?}",
                    other
                )));
            }
        }?;

        stream.play().map_err(classify_capture_error)?;

        info!(
            rate = config.sample_rate,
            channels = config.channels,
            "Microphone opened"
        );

        Ok(Self {
            stream: Some(stream),
            sample_rate: config.sample_rate,
            samples: Some(rx),
            error_rx,
        })
    }
}

impl Microphone for CpalMicrophone {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn take_samples(&mut self) -> Option<Receiver<Vec<f32>>> {
        self.samples.take()
    }

    fn stop_tracks(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!("Failed to pause microphone stream: {}", e);
            }
            // Dropping the stream drops its sender, which ends the capture thread
            drop(stream);
        }
    }

    fn poll_error(&self) -> Option<String> {
        self.error_rx.try_recv().ok()
    }
}

/// Build an input stream that forwards mono chunks, downmixing if needed
fn build_capture_stream<T>(
    device: &Device,
    config: &StreamConfig,
    tx: Sender<Vec<f32>>,
    error_tx: std_mpsc::Sender<String>,
) -> Result<Stream, SessionError>
where
    T: Sample + SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = if channels == 1 {
                    data.iter().map(|&s| f32::from_sample(s)).collect()
                } else {
                    data.chunks_exact(channels)
                        .map(|frame| {
                            frame.iter().map(|&s| f32::from_sample(s)).sum::<f32>()
                                / channels as f32
                        })
                        .collect()
                };
                // Never block the audio thread; a full queue means the
                // consumer stalled and the chunk is dropped
                let _ = tx.try_send(mono);
            },
            move |err| {
                let _ = error_tx.send(format!("Audio capture error: {}", err));
            },
            None,
        )
        .map_err(classify_capture_error)
}

// =============================================================================
// Capture Context
// =============================================================================

/// Cuts a continuous sample stream into fixed-size blocks
#[derive(Debug)]
pub struct BlockAssembler {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockAssembler {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            pending: Vec::with_capacity(block_size * 2),
        }
    }

    /// Append samples, invoking `emit` for every complete block
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(&[f32])) {
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.block_size {
            emit(&self.pending[..self.block_size]);
            self.pending.drain(..self.block_size);
        }
    }

    /// Samples waiting for the next block
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Drop every chunk already queued on the microphone channel
fn discard_backlog(samples: &Receiver<Vec<f32>>) -> usize {
    samples.try_iter().count()
}

/// Capture context: resamples microphone audio to the session rate and
/// hands fixed-size blocks to the process callback on a worker thread
pub struct CpalInputContext {
    sample_rate: u32,
    block_size: usize,
    /// Cleared on close; the worker exits at its next poll
    running: Arc<AtomicBool>,
    /// Worker thread handle (released without joining on close)
    worker: Option<JoinHandle<()>>,
    closed: bool,
    error_tx: std_mpsc::Sender<String>,
    error_rx: std_mpsc::Receiver<String>,
}

impl CpalInputContext {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        let (error_tx, error_rx) = std_mpsc::channel();
        Self {
            sample_rate,
            block_size,
            running: Arc::new(AtomicBool::new(true)),
            worker: None,
            closed: false,
            error_tx,
            error_rx,
        }
    }
}

impl InputContext for CpalInputContext {
    fn connect(
        &mut self,
        microphone: &mut dyn Microphone,
        mut process: ProcessCallback,
    ) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::ContextClosed);
        }

        let samples = microphone.take_samples().ok_or_else(|| {
            SessionError::AudioDevice("Microphone stream is already connected".to_string())
        })?;

        // The microphone has been running since acquisition; only audio
        // captured from here on belongs to the session
        let stale = discard_backlog(&samples);
        if stale > 0 {
            debug!(chunks = stale, "Discarded microphone audio captured before connect");
        }

        let mut resampler = if needs_resampling(microphone.sample_rate(), self.sample_rate) {
            Some(InputResampler::new(
                microphone.sample_rate(),
                self.sample_rate,
            )?)
        } else {
            None
        };

        let running = self.running.clone();
        let error_tx = self.error_tx.clone();
        let mut assembler = BlockAssembler::new(self.block_size);

        let worker = thread::Builder::new()
            .name("parley-capture".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let chunk = match samples.recv_timeout(Duration::from_millis(CAPTURE_POLL_MS)) {
                        Ok(chunk) => chunk,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };

                    let chunk = match resampler.as_mut() {
                        Some(resampler) => match resampler.process(&chunk) {
                            Ok(resampled) => resampled,
                            Err(e) => {
                                let _ = error_tx.send(e.to_string());
                                break;
                            }
                        },
                        None => chunk,
                    };

                    assembler.push(&chunk, |block| {
                        if running.load(Ordering::SeqCst) {
                            process(block);
                        }
                    });
                }
                debug!("Capture thread exited");
            })
            .map_err(|e| device_error("Failed to spawn capture thread", e))?;

        self.worker = Some(worker);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::ContextClosed);
        }
        self.closed = true;
        self.running.store(false, Ordering::SeqCst);
        // Don't join: the worker notices within one poll interval
        self.worker.take();
        Ok(())
    }

    fn poll_error(&self) -> Option<String> {
        self.error_rx.try_recv().ok()
    }
}

// =============================================================================
// Playback Timeline
// =============================================================================

/// Shared stop/finish flags for one scheduled buffer
#[derive(Debug, Default)]
struct SourceControl {
    stopped: AtomicBool,
    finished: AtomicBool,
}

/// A buffer placed on the timeline
struct Voice {
    start_frame: u64,
    samples: Vec<f32>,
    control: Arc<SourceControl>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sample-accurate playback timeline, advanced by the output callback
#[derive(Default)]
struct Timeline {
    /// Frames rendered so far at the context rate
    clock: u64,
    voices: Vec<Voice>,
}

impl Timeline {
    /// Render the next `out.len()` mono frames and advance the clock
    fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let start = self.clock;
        let end = start + out.len() as u64;

        for voice in &self.voices {
            if voice.control.stopped.load(Ordering::Acquire) {
                continue;
            }
            let from = voice.start_frame.max(start);
            let to = voice.end_frame().min(end);
            if from >= to {
                continue;
            }
            let dst = (from - start) as usize;
            let src = (from - voice.start_frame) as usize;
            let len = (to - from) as usize;
            for (o, s) in out[dst..dst + len]
                .iter_mut()
                .zip(&voice.samples[src..src + len])
            {
                *o += *s;
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.clock = end;
        self.voices.retain(|voice| {
            let done = voice.control.stopped.load(Ordering::Acquire) || voice.end_frame() <= end;
            if done {
                voice.control.finished.store(true, Ordering::Release);
            }
            !done
        });
    }
}

/// Pulls rendered audio for the device, upmixing and resampling as needed
struct OutputRenderer {
    timeline: Arc<Mutex<Timeline>>,
    active: Arc<AtomicBool>,
    channels: usize,
    resampler: Option<OutputResampler>,
    /// Device-rate interleaved samples not yet handed to the device
    pending: VecDeque<f32>,
    scratch: Vec<f32>,
}

impl OutputRenderer {
    fn render_mono(&mut self, frames: usize) {
        self.scratch.resize(frames, 0.0);
        match self.timeline.lock() {
            Ok(mut timeline) => timeline.render(&mut self.scratch),
            Err(_) => self.scratch.fill(0.0),
        }
    }

    /// Fill interleaved device samples
    fn fill(&mut self, out: &mut [f32]) {
        if !self.active.load(Ordering::SeqCst) {
            out.fill(0.0);
            return;
        }

        if self.resampler.is_none() {
            let frames = out.len() / self.channels;
            self.render_mono(frames);
            for (frame, &sample) in out.chunks_exact_mut(self.channels).zip(&self.scratch) {
                frame.fill(sample);
            }
            return;
        }

        while self.pending.len() < out.len() {
            let chunk = match self.resampler.as_ref() {
                Some(resampler) => resampler.chunk_size(),
                None => break,
            };
            self.render_mono(chunk);
            let resampled = match self.resampler.as_mut() {
                Some(resampler) => resampler.process(&self.scratch),
                None => break,
            };
            match resampled {
                Ok(samples) => self.pending.extend(samples),
                Err(_) => break,
            }
        }

        for sample in out.iter_mut() {
            *sample = self.pending.pop_front().unwrap_or(0.0);
        }
    }
}

// =============================================================================
// Playback Context
// =============================================================================

/// Playback context with a monotonic clock at the session output rate
pub struct CpalOutputContext {
    /// The cpal output stream (None once closed)
    stream: Option<Stream>,
    timeline: Arc<Mutex<Timeline>>,
    active: Arc<AtomicBool>,
    sample_rate: u32,
    /// Receiver for audio stream errors
    error_rx: std_mpsc::Receiver<String>,
}

impl CpalOutputContext {
    /// Open the named output device and start the clock
    pub fn open(device_name: &str, sample_rate: u32) -> Result<Self, SessionError> {
        let device = find_output_device(device_name)
            .ok_or_else(|| SessionError::AudioDevice("Output device not found".to_string()))?;

        let (config, sample_format) = choose_output_config(&device, sample_rate)?;
        let channels = config.channels.max(1) as usize;

        let resampler = if needs_resampling(sample_rate, config.sample_rate) {
            Some(OutputResampler::new(
                sample_rate,
                config.sample_rate,
                channels,
            )?)
        } else {
            None
        };

        let timeline = Arc::new(Mutex::new(Timeline::default()));
        let active = Arc::new(AtomicBool::new(true));
        let renderer = OutputRenderer {
            timeline: timeline.clone(),
            active: active.clone(),
            channels,
            resampler,
            pending: VecDeque::new(),
            scratch: Vec::new(),
        };

        let (error_tx, error_rx) = std_mpsc::channel();

        let stream = match sample_format {
            SampleFormat::F32 => build_playback_stream::<f32>(&device, &config, renderer, error_tx),
            SampleFormat::I16 => build_playback_stream::<i16>(&device, &config, renderer, error_tx),
            SampleFormat::U16 => build_playback_stream::<u16>(&device, &config, renderer, error_tx),
            other => {
                return Err(SessionError::AudioDevice(format!(
                    "Unsupported sample format: {:?}",
                    other
                )));
            }
        }?;

        stream
            .play()
            .map_err(|e| device_error("Failed to start playback", e))?;

        info!(
            device_rate = config.sample_rate,
            channels = config.channels,
            "Output context opened at {}Hz",
            sample_rate
        );

        Ok(Self {
            stream: Some(stream),
            timeline,
            active,
            sample_rate,
            error_rx,
        })
    }
}

impl OutputContext for CpalOutputContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        let clock = self.timeline.lock().map(|t| t.clock).unwrap_or(0);
        clock as f64 / self.sample_rate as f64
    }

    fn schedule(
        &mut self,
        buffer: &AudioBuffer,
        start_time: f64,
    ) -> Result<Box<dyn ScheduledSource>, SessionError> {
        if self.stream.is_none() {
            return Err(SessionError::ContextClosed);
        }
        if buffer.sample_rate() != self.sample_rate {
            return Err(SessionError::AudioDevice(format!(
                "Buffer rate {}Hz does not match context rate {}Hz",
                buffer.sample_rate(),
                self.sample_rate
            )));
        }

        let start_frame = (start_time.max(0.0) * self.sample_rate as f64).round() as u64;
        let control = Arc::new(SourceControl::default());

        let mut timeline = self
            .timeline
            .lock()
            .map_err(|_| SessionError::AudioDevice("Playback timeline poisoned".to_string()))?;
        timeline.voices.push(Voice {
            start_frame,
            samples: buffer.to_mono(),
            control: control.clone(),
        });

        Ok(Box::new(CpalSource { control }))
    }

    fn close(&mut self) -> Result<(), SessionError> {
        let Some(stream) = self.stream.take() else {
            return Err(SessionError::ContextClosed);
        };

        self.active.store(false, Ordering::SeqCst);
        if let Err(e) = stream.pause() {
            debug!("Failed to pause output stream: {}", e);
        }
        drop(stream);

        if let Ok(mut timeline) = self.timeline.lock() {
            for voice in timeline.voices.drain(..) {
                voice.control.finished.store(true, Ordering::Release);
            }
        }
        Ok(())
    }

    fn poll_error(&self) -> Option<String> {
        self.error_rx.try_recv().ok()
    }
}

/// Pick an output config, preferring one that runs natively at `rate`
fn choose_output_config(
    device: &Device,
    rate: u32,
) -> Result<(StreamConfig, SampleFormat), SessionError> {
    if let Ok(configs) = device.supported_output_configs() {
        let native = configs
            .filter(|c| {
                c.channels() <= STEREO_CHANNELS
                    && c.min_sample_rate() <= rate
                    && c.max_sample_rate() >= rate
                    && SUPPORTED_FORMATS.contains(&c.sample_format())
            })
            .min_by_key(|c| c.channels());

        if let Some(cfg) = native {
            let config = StreamConfig {
                channels: cfg.channels(),
                sample_rate: rate,
                buffer_size: cpal::BufferSize::Default,
            };
            return Ok((config, cfg.sample_format()));
        }
    }

    // Fall back to the device default and resample
    let default = device
        .default_output_config()
        .map_err(|e| device_error("No usable output config", e))?;
    Ok((default.config(), default.sample_format()))
}

/// Build an output stream driven by the renderer
fn build_playback_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut renderer: OutputRenderer,
    error_tx: std_mpsc::Sender<String>,
) -> Result<Stream, SessionError>
where
    T: Sample + SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                renderer.fill(&mut scratch);
                for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                    *dst = T::from_sample(src);
                }
            },
            move |err| {
                let _ = error_tx.send(format!("Playback error: {}", err));
            },
            None,
        )
        .map_err(|e| device_error("Failed to build output stream", e))
}

/// Handle to a buffer on a [`CpalOutputContext`] timeline
struct CpalSource {
    control: Arc<SourceControl>,
}

impl ScheduledSource for CpalSource {
    fn is_finished(&self) -> bool {
        self.control.finished.load(Ordering::Acquire) || self.control.stopped.load(Ordering::Acquire)
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        if self.control.finished.load(Ordering::Acquire)
            || self.control.stopped.swap(true, Ordering::AcqRel)
        {
            return Err(SessionError::AlreadyStopped);
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(start_frame: u64, samples: Vec<f32>) -> (Voice, Arc<SourceControl>) {
        let control = Arc::new(SourceControl::default());
        (
            Voice {
                start_frame,
                samples,
                control: control.clone(),
            },
            control,
        )
    }

    #[test]
    fn test_audio_device_system_default() {
        let device = AudioDevice::system_default();
        assert_eq!(device.name, SYSTEM_DEFAULT_DEVICE_NAME);
        assert!(device.is_default);
        assert_eq!(device.to_string(), SYSTEM_DEFAULT_DEVICE_NAME);
    }

    #[test]
    fn test_default_name_detection() {
        assert!(is_default_name(""));
        assert!(is_default_name(SYSTEM_DEFAULT_DEVICE_NAME));
        assert!(!is_default_name("USB Headset"));
    }

    #[test]
    fn test_capture_error_classification() {
        assert_eq!(
            classify_capture_error("Permission denied by user"),
            SessionError::MicrophoneDenied
        );
        assert_eq!(
            classify_capture_error("The requested device is no longer available"),
            SessionError::MicrophoneUnavailable
        );
        assert!(matches!(
            classify_capture_error("buffer underrun"),
            SessionError::AudioDevice(_)
        ));
    }

    #[test]
    fn test_block_assembler_emits_fixed_blocks() {
        let mut assembler = BlockAssembler::new(4);
        let mut blocks = Vec::new();

        assembler.push(&[1.0, 2.0, 3.0], |b| blocks.push(b.to_vec()));
        assert!(blocks.is_empty());
        assert_eq!(assembler.pending(), 3);

        assembler.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |b| blocks.push(b.to_vec()));
        assert_eq!(
            blocks,
            vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]
        );
        assert_eq!(assembler.pending(), 1);
    }

    struct QueuedMicrophone {
        rate: u32,
        samples: Option<Receiver<Vec<f32>>>,
    }

    impl Microphone for QueuedMicrophone {
        fn sample_rate(&self) -> u32 {
            self.rate
        }

        fn take_samples(&mut self) -> Option<Receiver<Vec<f32>>> {
            self.samples.take()
        }

        fn stop_tracks(&mut self) {}
    }

    #[test]
    fn test_connect_discards_audio_queued_before_connect() {
        const BLOCK: usize = 8;
        let (tx, rx) = crossbeam_channel::bounded(MAX_PENDING_CHUNKS);
        for _ in 0..5 {
            tx.send(vec![0.9; BLOCK]).unwrap();
        }

        let mut microphone = QueuedMicrophone {
            rate: 16000,
            samples: Some(rx),
        };
        let (block_tx, block_rx) = crossbeam_channel::unbounded::<Vec<f32>>();
        let mut input = CpalInputContext::new(16000, BLOCK);
        input
            .connect(
                &mut microphone,
                Box::new(move |block| {
                    let _ = block_tx.send(block.to_vec());
                }),
            )
            .unwrap();

        tx.send(vec![0.1; BLOCK]).unwrap();

        let block = block_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(block, vec![0.1; BLOCK]);
        assert!(block_rx.recv_timeout(Duration::from_millis(200)).is_err());

        input.close().unwrap();
    }

    #[test]
    fn test_discard_backlog_empties_queue() {
        let (tx, rx) = crossbeam_channel::bounded(MAX_PENDING_CHUNKS);
        tx.send(vec![0.0; 4]).unwrap();
        tx.send(vec![0.0; 4]).unwrap();

        assert_eq!(discard_backlog(&rx), 2);
        assert_eq!(discard_backlog(&rx), 0);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_timeline_plays_back_to_back_without_gap() {
        let mut timeline = Timeline::default();
        let (first, first_control) = voice(0, vec![0.1; 4]);
        let (second, _) = voice(4, vec![0.2; 4]);
        timeline.voices.push(first);
        timeline.voices.push(second);

        let mut out = vec![0.0; 8];
        timeline.render(&mut out);

        assert_eq!(out, vec![0.1, 0.1, 0.1, 0.1, 0.2, 0.2, 0.2, 0.2]);
        assert_eq!(timeline.clock, 8);
        assert!(timeline.voices.is_empty());
        assert!(first_control.finished.load(Ordering::Acquire));
    }

    #[test]
    fn test_timeline_waits_for_start_frame() {
        let mut timeline = Timeline::default();
        let (late, control) = voice(6, vec![0.5; 4]);
        timeline.voices.push(late);

        let mut out = vec![0.0; 8];
        timeline.render(&mut out);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5, 0.5]);
        assert!(!control.finished.load(Ordering::Acquire));

        timeline.render(&mut out);
        assert_eq!(&out[..2], &[0.5, 0.5]);
        assert!(control.finished.load(Ordering::Acquire));
    }

    #[test]
    fn test_timeline_skips_stopped_voice() {
        let mut timeline = Timeline::default();
        let (v, control) = voice(0, vec![0.5; 16]);
        timeline.voices.push(v);

        control.stopped.store(true, Ordering::Release);
        let mut out = vec![0.0; 4];
        timeline.render(&mut out);

        assert!(out.iter().all(|&s| s == 0.0));
        assert!(timeline.voices.is_empty());
    }

    #[test]
    fn test_timeline_clamps_mixed_output() {
        let mut timeline = Timeline::default();
        timeline.voices.push(voice(0, vec![0.8; 2]).0);
        timeline.voices.push(voice(0, vec![0.8; 2]).0);

        let mut out = vec![0.0; 2];
        timeline.render(&mut out);
        assert_eq!(out, vec![1.0, 1.0]);
    }

    #[test]
    fn test_source_stop_after_finish_errors() {
        let control = Arc::new(SourceControl::default());
        let mut source = CpalSource {
            control: control.clone(),
        };

        assert!(!source.is_finished());
        assert!(source.stop().is_ok());
        assert!(source.is_finished());
        assert_eq!(source.stop(), Err(SessionError::AlreadyStopped));

        let finished = Arc::new(SourceControl::default());
        finished.finished.store(true, Ordering::Release);
        let mut source = CpalSource { control: finished };
        assert_eq!(source.stop(), Err(SessionError::AlreadyStopped));
    }

    #[test]
    fn test_renderer_upmixes_to_stereo() {
        let timeline = Arc::new(Mutex::new(Timeline::default()));
        if let Ok(mut t) = timeline.lock() {
            t.voices.push(voice(0, vec![0.25, 0.5]).0);
        }
        let mut renderer = OutputRenderer {
            timeline: timeline.clone(),
            active: Arc::new(AtomicBool::new(true)),
            channels: 2,
            resampler: None,
            pending: VecDeque::new(),
            scratch: Vec::new(),
        };

        let mut out = vec![0.0; 4];
        renderer.fill(&mut out);
        assert_eq!(out, vec![0.25, 0.25, 0.5, 0.5]);
        assert_eq!(timeline.lock().map(|t| t.clock).unwrap_or(0), 2);
    }

    #[test]
    fn test_renderer_inactive_outputs_silence() {
        let timeline = Arc::new(Mutex::new(Timeline::default()));
        let mut renderer = OutputRenderer {
            timeline: timeline.clone(),
            active: Arc::new(AtomicBool::new(false)),
            channels: 1,
            resampler: None,
            pending: VecDeque::new(),
            scratch: Vec::new(),
        };

        let mut out = vec![1.0; 4];
        renderer.fill(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        // Clock does not advance while inactive
        assert_eq!(timeline.lock().map(|t| t.clock).unwrap_or(99), 0);
    }
}
