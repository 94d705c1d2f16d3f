//! Transport seam between streams and the network
//!
//! A [`Transport`] opens one [`Session`] per stream. Sessions only send;
//! replies come back asynchronously through the [`ReplySink`] handed to
//! `open_session`, which forwards them as [`Event`]s to the runner's router.

use crate::id::StreamId;
use bytes::Bytes;
use crossbeam::channel::Sender;
use std::net::SocketAddr;
use tclass_io::SocketError;
use thiserror::Error;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("No buffer available for outgoing datagram")]
    NoBuffer,

    #[error("Short send: {sent} of {expected} bytes")]
    ShortSend { sent: usize, expected: usize },

    #[error("Session closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Socket(e) => e.is_transient(),
            TransportError::NoBuffer | TransportError::ShortSend { .. } => true,
            TransportError::Closed | TransportError::Other(_) => false,
        }
    }
}

/// Events routed to the runner
#[derive(Debug, Clone)]
pub enum Event {
    /// A datagram arrived for a stream
    Reply { stream: StreamId, datagram: Bytes },
    /// A session's receive path failed
    SessionError { stream: StreamId, error: String },
    /// Stop routing
    Shutdown,
}

/// Per-stream event after routing
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Reply(Bytes),
}

/// Where a session delivers what it receives
#[derive(Debug, Clone)]
pub struct ReplySink {
    stream: StreamId,
    events: Sender<Event>,
}

impl ReplySink {
    pub fn new(stream: StreamId, events: Sender<Event>) -> Self {
        ReplySink { stream, events }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Hand a received datagram to the router
    ///
    /// Returns `false` once the router is gone.
    pub fn deliver(&self, datagram: Bytes) -> bool {
        self.events
            .send(Event::Reply {
                stream: self.stream,
                datagram,
            })
            .is_ok()
    }

    /// Report a receive failure
    pub fn report_error(&self, error: impl ToString) -> bool {
        self.events
            .send(Event::SessionError {
                stream: self.stream,
                error: error.to_string(),
            })
            .is_ok()
    }
}

/// Parameters for opening a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRequest {
    pub stream: StreamId,
    pub peer: SocketAddr,
    pub local: SocketAddr,
}

/// Outgoing half of one stream's connection
pub trait Session: Send + 'static {
    fn send(&mut self, datagram: &[u8]) -> Result<(), TransportError>;
}

/// Factory for sessions
pub trait Transport {
    type Session: Session;

    /// Open a session tagged with the stream's priority class
    fn open_session(
        &self,
        request: &SessionRequest,
        replies: ReplySink,
    ) -> Result<Self::Session, TransportError>;
}
