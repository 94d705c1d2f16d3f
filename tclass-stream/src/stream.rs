//! Per-priority request/echo state machine
//!
//! A stream is either idle or awaiting the echo of exactly one request.
//! `begin_cycle` sends the next request; the cycle then completes through
//! either `on_reply` or `on_timeout`, whichever comes first. The second of
//! the two finds the stream idle (or awaiting a newer sequence number) and is
//! ignored, so a cycle can never be classified twice.
//!
//! The state machine does no I/O of its own apart from `Session::send`, and
//! takes the current time as an argument, so it can be driven by a worker
//! thread or directly from tests.

use crate::config::StreamConfig;
use crate::id::StreamId;
use crate::stats::{Outcome, StatsAggregator};
use crate::transport::{Session, TransportError};
use rand::rngs::StdRng;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tclass_io::Timestamp;
use tclass_protocol::{decode, encode, PayloadSource, SeqNumber};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Stream errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Stream {0} already has a request outstanding")]
    Busy(StreamId),

    #[error("Stream {id} gave up after {attempts} failed sends: {last}")]
    SendExhausted {
        id: StreamId,
        attempts: u32,
        last: TransportError,
    },
}

/// Where the stream is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Awaiting { seq: SeqNumber, deadline: Timestamp },
}

/// Result of starting a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Request is on the wire
    Sent {
        seq: SeqNumber,
        deadline: Timestamp,
        len: usize,
    },
    /// Send failed; retry the same cycle after this pause
    Backoff(Duration),
}

/// One priority class of one address family
pub struct Stream<S: Session> {
    id: StreamId,
    session: S,
    payload: PayloadSource,
    rng: StdRng,
    config: StreamConfig,
    stats: Arc<StatsAggregator>,
    sequence_sent: SeqNumber,
    state: StreamState,
    expected_reply_len: usize,
    /// Body length of a cycle whose send failed, reused on retry
    pending_len: Option<usize>,
    failures: u32,
    last_dispatch: Option<Timestamp>,
}

impl<S: Session> Stream<S> {
    pub fn new(
        id: StreamId,
        session: S,
        payload: PayloadSource,
        rng: StdRng,
        config: StreamConfig,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        stats.register(id);
        Stream {
            id,
            session,
            payload,
            rng,
            config,
            stats,
            sequence_sent: SeqNumber::ZERO,
            state: StreamState::Idle,
            expected_reply_len: 0,
            pending_len: None,
            failures: 0,
            last_dispatch: None,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Sequence number of the last request that reached the transport
    pub fn sequence_sent(&self) -> SeqNumber {
        self.sequence_sent
    }

    /// Size of the last request, which an echo should match
    pub fn expected_reply_len(&self) -> usize {
        self.expected_reply_len
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self.state, StreamState::Awaiting { .. })
    }

    /// Reply deadline of the outstanding request
    pub fn deadline(&self) -> Option<Timestamp> {
        match self.state {
            StreamState::Awaiting { deadline, .. } => Some(deadline),
            StreamState::Idle => None,
        }
    }

    /// Time left before the next dispatch is allowed
    pub fn cooldown_remaining(&self, now: Timestamp) -> Duration {
        match self.last_dispatch {
            Some(last) => last.wrapping_add(self.config.cooldown).remaining_from(now),
            None => Duration::ZERO,
        }
    }

    fn pick_len(&mut self) -> usize {
        if let Some(len) = self.pending_len.take() {
            return len;
        }
        match self.payload.corpus_len() {
            0 => 0,
            n => self.rng.gen_range(0..n),
        }
    }

    /// Send the next request
    pub fn begin_cycle(&mut self, now: Timestamp) -> Result<Dispatch, StreamError> {
        if self.is_awaiting() {
            return Err(StreamError::Busy(self.id));
        }

        let len = self.pick_len();
        let seq = self.sequence_sent.next();
        let datagram = encode(seq, now.as_millis(), &self.payload.generate(len));

        match self.session.send(&datagram) {
            Ok(()) => {
                let deadline = now.wrapping_add(self.config.wait);
                self.sequence_sent = seq;
                self.expected_reply_len = datagram.len();
                self.state = StreamState::Awaiting { seq, deadline };
                self.failures = 0;
                self.last_dispatch = Some(now);
                self.stats.record_send(self.id, now);
                trace!(stream = %self.id, %seq, len = datagram.len(), "request sent");

                Ok(Dispatch::Sent {
                    seq,
                    deadline,
                    len: datagram.len(),
                })
            }
            Err(e) => {
                self.failures += 1;
                self.pending_len = Some(len);

                let retry = self.config.retry;
                if retry.max_attempts.is_some_and(|max| self.failures >= max) {
                    return Err(StreamError::SendExhausted {
                        id: self.id,
                        attempts: self.failures,
                        last: e,
                    });
                }

                if self.failures == 1 {
                    warn!(stream = %self.id, %seq, error = %e, "send failed, backing off");
                } else {
                    debug!(stream = %self.id, %seq, attempt = self.failures, error = %e, "send failed again");
                }
                Ok(Dispatch::Backoff(retry.backoff))
            }
        }
    }

    fn classify(&self, datagram: &[u8], expected: SeqNumber) -> Outcome {
        match decode(datagram) {
            Ok(header) if !header.is_seq_num() => Outcome::Invalid,
            Ok(header) if header.seq != expected => {
                debug!(
                    stream = %self.id,
                    expected = %expected,
                    got = %header.seq,
                    "echo out of order"
                );
                Outcome::WrongOrder
            }
            Ok(_) => Outcome::Received,
            Err(e) => {
                debug!(stream = %self.id, error = %e, "undecodable echo");
                Outcome::Invalid
            }
        }
    }

    /// Complete the outstanding cycle with an echo
    ///
    /// Returns `None` when nothing is outstanding.
    pub fn on_reply(&mut self, now: Timestamp, datagram: &[u8]) -> Option<Outcome> {
        let StreamState::Awaiting { seq, .. } = self.state else {
            debug!(stream = %self.id, len = datagram.len(), "echo while idle, discarded");
            return None;
        };

        if datagram.len() != self.expected_reply_len {
            debug!(
                stream = %self.id,
                expected = self.expected_reply_len,
                got = datagram.len(),
                "echo length differs from request"
            );
        }

        let outcome = self.classify(datagram, seq);
        self.state = StreamState::Idle;
        if let Some(rtt) = self.stats.record_outcome(self.id, outcome, now) {
            trace!(stream = %self.id, %seq, rtt_ms = rtt, "echo received");
        }
        Some(outcome)
    }

    /// Complete the cycle for `seq` as dropped
    ///
    /// Ignored unless `seq` is still the outstanding request.
    pub fn on_timeout(&mut self, now: Timestamp, seq: SeqNumber) -> Option<Outcome> {
        match self.state {
            StreamState::Awaiting { seq: current, .. } if current == seq => {
                self.state = StreamState::Idle;
                self.stats.record_outcome(self.id, Outcome::Dropped, now);
                trace!(stream = %self.id, %seq, "no echo within wait window");
                Some(Outcome::Dropped)
            }
            _ => None,
        }
    }

    /// Time out the outstanding request if its deadline has passed
    pub fn poll_timeout(&mut self, now: Timestamp) -> Option<Outcome> {
        match self.state {
            StreamState::Awaiting { seq, deadline } if now.is_at_or_after(deadline) => {
                self.on_timeout(now, seq)
            }
            _ => None,
        }
    }
}

impl<S: Session> std::fmt::Debug for Stream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("sequence_sent", &self.sequence_sent)
            .field("state", &self.state)
            .finish()
    }
}
