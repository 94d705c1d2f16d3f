//! Shared helpers for the tclass integration tests
//!
//! In-memory transports that stand in for UDP: a session that records what
//! it sends, and a transport whose sessions echo, stay silent, fail to send
//! or refuse to open for selected streams.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tclass_stream::{
    ReplySink, ReportSink, Report, Session, SessionRequest, StatsAggregator, StreamId, Transport,
    TransportError,
};

/// Session that records every datagram; can be told to fail sends
#[derive(Clone, Default)]
pub struct CaptureSession {
    pub sent: Arc<Mutex<Vec<Bytes>>>,
    pub fail_next: Arc<Mutex<u32>>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent datagram sent
    pub fn last(&self) -> Option<Bytes> {
        self.sent.lock().last().cloned()
    }

    /// Datagram sent in position `index`
    pub fn nth(&self, index: usize) -> Bytes {
        self.sent.lock()[index].clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn fail_sends(&self, count: u32) {
        *self.fail_next.lock() = count;
    }
}

impl Session for CaptureSession {
    fn send(&mut self, datagram: &[u8]) -> Result<(), TransportError> {
        let mut fail = self.fail_next.lock();
        if *fail > 0 {
            *fail -= 1;
            return Err(TransportError::NoBuffer);
        }
        self.sent.lock().push(Bytes::copy_from_slice(datagram));
        Ok(())
    }
}

/// What a mock peer does with each request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBehaviour {
    /// Reflect the datagram unchanged
    Echo,
    /// Never answer
    Silent,
    /// Answer with an unknown type tag
    Corrupt,
    /// Fail every send
    Unsendable,
}

/// Session whose replies are produced synchronously by a mock peer
pub struct MockSession {
    replies: ReplySink,
    behaviour: PeerBehaviour,
    sent: Arc<Mutex<u64>>,
}

impl Session for MockSession {
    fn send(&mut self, datagram: &[u8]) -> Result<(), TransportError> {
        *self.sent.lock() += 1;
        let reply = match self.behaviour {
            PeerBehaviour::Echo => Bytes::copy_from_slice(datagram),
            PeerBehaviour::Silent => return Ok(()),
            PeerBehaviour::Unsendable => return Err(TransportError::NoBuffer),
            PeerBehaviour::Corrupt => {
                let mut corrupt = datagram.to_vec();
                if let Some(tag) = corrupt.first_mut() {
                    *tag = !*tag;
                }
                Bytes::from(corrupt)
            }
        };
        if !self.replies.deliver(reply) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

/// Transport backed by [`MockSession`]s
#[derive(Clone)]
pub struct MockTransport {
    behaviour: PeerBehaviour,
    refuse: HashSet<StreamId>,
    pub opened: Arc<Mutex<Vec<SessionRequest>>>,
    pub sent: Arc<Mutex<u64>>,
}

impl MockTransport {
    pub fn new(behaviour: PeerBehaviour) -> Self {
        MockTransport {
            behaviour,
            refuse: HashSet::new(),
            opened: Arc::new(Mutex::new(Vec::new())),
            sent: Arc::new(Mutex::new(0)),
        }
    }

    /// Fail `open_session` for this stream
    pub fn refusing(mut self, id: StreamId) -> Self {
        self.refuse.insert(id);
        self
    }
}

impl Transport for MockTransport {
    type Session = MockSession;

    fn open_session(
        &self,
        request: &SessionRequest,
        replies: ReplySink,
    ) -> Result<MockSession, TransportError> {
        if self.refuse.contains(&request.stream) {
            return Err(TransportError::Other("peer unreachable".into()));
        }
        self.opened.lock().push(*request);
        Ok(MockSession {
            replies,
            behaviour: self.behaviour,
            sent: self.sent.clone(),
        })
    }
}

/// Report sink that keeps every report
#[derive(Clone, Default)]
pub struct CollectingSink {
    pub reports: Arc<Mutex<Vec<Report>>>,
}

impl ReportSink for CollectingSink {
    fn emit(&self, report: &Report) {
        self.reports.lock().push(report.clone());
    }
}

/// Aggregator with a report interval long enough never to fire in a test
pub fn quiet_stats() -> Arc<StatsAggregator> {
    Arc::new(StatsAggregator::new(
        Duration::from_secs(3600),
        Duration::from_secs(3600),
        Box::new(CollectingSink::default()),
    ))
}

/// Copy of `datagram` with its sequence number replaced
pub fn with_sequence(datagram: &[u8], seq: u32) -> Bytes {
    let mut patched = datagram.to_vec();
    patched[2..6].copy_from_slice(&seq.to_be_bytes());
    Bytes::from(patched)
}
