//! WebSocket transport for the live agent endpoint
//!
//! Connect flow: open the socket, send the one-shot setup message, wait for
//! `setupComplete`, then report `Open`. After that a writer task drains the
//! uplink queue and a reader task turns inbound frames into events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parley_common::protocol::{ClientMessage, ServerMessage, SessionConfig, WireFrame};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, trace, warn};

use crate::error::SessionError;
use crate::voice::transport::{EventSender, Transport, TransportEvent, TransportSession};

// =============================================================================
// Constants
// =============================================================================

/// Bidirectional streaming endpoint of the agent service
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Time allowed for the WebSocket handshake
const CONNECT_TIMEOUT_SECS: u64 = 15;

/// Time allowed between sending setup and receiving `setupComplete`
const SETUP_TIMEOUT_SECS: u64 = 15;

// =============================================================================
// Frame Decoding
// =============================================================================

/// Classified inbound WebSocket frame
#[derive(Debug, PartialEq)]
enum Inbound {
    Message(ServerMessage),
    Closed(Option<String>),
    Invalid(String),
    Ignored,
}

/// The service sends JSON as either text or binary frames
fn decode_frame(frame: Message) -> Inbound {
    let parsed = match frame {
        Message::Text(text) => ServerMessage::from_json(text.as_str()),
        Message::Binary(data) => serde_json::from_slice(&data),
        Message::Close(close) => {
            return Inbound::Closed(close.map(|c| c.reason.as_str().to_string()));
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return Inbound::Ignored,
    };

    match parsed {
        Ok(message) => Inbound::Message(message),
        Err(e) => Inbound::Invalid(e.to_string()),
    }
}

fn connection_error(context: &str, err: impl std::fmt::Display) -> SessionError {
    SessionError::Connection(format!("{}: {}", context, err))
}

// =============================================================================
// Transport
// =============================================================================

/// Transport speaking the live agent protocol over a secure WebSocket
#[derive(Debug, Clone)]
pub struct LiveTransport {
    endpoint: String,
    api_key: String,
}

impl LiveTransport {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    /// Endpoint URL with the API key as a query parameter
    fn url(&self) -> String {
        format!(
            "{}?key={}",
            self.endpoint,
            utf8_percent_encode(&self.api_key, NON_ALPHANUMERIC)
        )
    }
}

#[async_trait]
impl Transport for LiveTransport {
    async fn connect(
        &self,
        config: &SessionConfig,
        events: EventSender,
    ) -> Result<Arc<dyn TransportSession>, SessionError> {
        info!("Connecting to {}", self.endpoint);

        let (socket, _) = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            tokio_tungstenite::connect_async(self.url()),
        )
        .await
        .map_err(|_| SessionError::Connection("Timed out connecting".to_string()))?
        .map_err(|e| connection_error("WebSocket handshake failed", e))?;

        let (mut write, mut read) = socket.split();

        let setup = config
            .setup_message()
            .to_json()
            .map_err(|e| connection_error("Failed to encode setup", e))?;
        write
            .send(Message::text(setup))
            .await
            .map_err(|e| connection_error("Failed to send setup", e))?;

        tokio::time::timeout(
            Duration::from_secs(SETUP_TIMEOUT_SECS),
            wait_for_setup(&mut read),
        )
        .await
        .map_err(|_| SessionError::Connection("Timed out waiting for setup".to_string()))??;

        debug!(model = %config.model_resource(), "Setup complete");
        events.emit(TransportEvent::Open);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(write, outbound_rx));
        tokio::spawn(read_loop(read, events));

        Ok(Arc::new(LiveSession::new(outbound_tx)))
    }
}

/// Consume frames until the server acknowledges the setup
async fn wait_for_setup<S>(read: &mut S) -> Result<(), SessionError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = read.next().await {
        let frame = frame.map_err(|e| connection_error("WebSocket error during setup", e))?;
        match decode_frame(frame) {
            Inbound::Message(message) if message.is_setup_complete() => return Ok(()),
            Inbound::Message(_) | Inbound::Ignored => {}
            Inbound::Invalid(e) => warn!("Ignoring invalid message during setup: {}", e),
            Inbound::Closed(reason) => {
                return Err(SessionError::Connection(format!(
                    "Closed during setup: {}",
                    reason.unwrap_or_default()
                )));
            }
        }
    }

    Err(SessionError::Connection(
        "Connection ended during setup".to_string(),
    ))
}

// =============================================================================
// Session
// =============================================================================

enum Outbound {
    Frame(WireFrame),
    Close,
}

/// Live session: uplink sends are queued for the writer task
struct LiveSession {
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
}

impl LiveSession {
    fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            outbound,
            closed: AtomicBool::new(false),
        }
    }
}

impl TransportSession for LiveSession {
    fn send(&self, frame: WireFrame) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Connection("Session closed".to_string()));
        }
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| SessionError::Connection("Writer task ended".to_string()))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.outbound.send(Outbound::Close);
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drain the uplink queue into the socket
async fn write_loop<S>(mut write: S, mut outbound: mpsc::UnboundedReceiver<Outbound>)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(frame) => {
                let json = match ClientMessage::audio(frame).to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode uplink frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::text(json)).await {
                    debug!("Uplink write failed: {}", e);
                    break;
                }
            }
            Outbound::Close => {
                if let Err(e) = write.close().await {
                    debug!("Failed to send close frame: {}", e);
                }
                break;
            }
        }
    }
    trace!("Writer task exited");
}

/// Turn inbound frames into transport events until the socket ends
async fn read_loop<S>(mut read: S, events: EventSender)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = read.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                events.emit(TransportEvent::Error(e.to_string()));
                return;
            }
        };

        match decode_frame(frame) {
            Inbound::Message(message) => {
                if !events.emit(TransportEvent::Message(message)) {
                    return;
                }
            }
            Inbound::Closed(reason) => {
                info!("Server closed session: {}", reason.unwrap_or_default());
                events.emit(TransportEvent::Close);
                return;
            }
            Inbound::Invalid(e) => warn!("Ignoring invalid message: {}", e),
            Inbound::Ignored => {}
        }
    }

    events.emit(TransportEvent::Close);
}

// =============================================================================
// Tests
// =============================================================================
