//! Transport seam between the session engine and the remote agent
//!
//! A [`Transport`] opens sessions; a [`TransportSession`] carries uplink
//! frames. Everything the remote side pushes back (open, messages, errors,
//! close) arrives as [`TransportEvent`]s on the dispatcher's event channel,
//! stamped with the connection generation that produced them.

use std::sync::Arc;

use async_trait::async_trait;
use parley_common::protocol::{ServerMessage, SessionConfig, WireFrame};
use tokio::sync::mpsc;

use crate::error::SessionError;

/// Push events raised by a transport session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The session is ready for uplink audio
    Open,
    /// A message from the agent
    Message(ServerMessage),
    /// The session failed
    Error(String),
    /// The remote side closed the session
    Close,
}

/// Everything delivered to the dispatcher's event channel
pub enum SessionEvent {
    /// Pushed by the transport
    Transport(TransportEvent),
    /// The pending connect finished and produced a live session
    Resolved(Arc<dyn TransportSession>),
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(event) => f.debug_tuple("Transport").field(event).finish(),
            Self::Resolved(_) => f.write_str("Resolved"),
        }
    }
}

/// A session event and the connection generation it belongs to
#[derive(Debug)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: SessionEvent,
}

/// Sender handed to a transport for one connection attempt
#[derive(Debug, Clone)]
pub struct EventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSender {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    /// Generation this sender stamps on its events
    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Push a transport event; returns false once the dispatcher is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.send(SessionEvent::Transport(event))
    }

    /// Hand the resolved session to the dispatcher
    pub fn resolve(&self, session: Arc<dyn TransportSession>) -> bool {
        self.send(SessionEvent::Resolved(session))
    }

    fn send(&self, event: SessionEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Opens sessions with the remote agent
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and send the setup message
    ///
    /// Implementations emit [`TransportEvent::Open`] once the session can
    /// accept audio, then keep pushing events through `events` until the
    /// session closes.
    async fn connect(
        &self,
        config: &SessionConfig,
        events: EventSender,
    ) -> Result<Arc<dyn TransportSession>, SessionError>;
}

/// A live session with the remote agent
pub trait TransportSession: Send + Sync {
    /// Queue an uplink frame without blocking
    fn send(&self, frame: WireFrame) -> Result<(), SessionError>;

    /// Close the session; further calls are no-ops
    fn close(&self);
}
