//! Per-stream counters and the shared aggregator
//!
//! Each stream only ever touches its own counters. The aggregator keeps one
//! lock per stream so that recording never contends across streams; the only
//! shared state is the report schedule, which sits behind its own mutex.

use crate::id::StreamId;
use crate::report::{Poll, Report, ReportRow, ReportSchedule, ReportSink};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tclass_io::Timestamp;
use tracing::warn;

/// Classification of one completed cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Echo with the expected sequence number
    Received,
    /// No echo within the wait window
    Dropped,
    /// Echo carrying another sequence number
    WrongOrder,
    /// Undecodable echo or unknown type tag
    Invalid,
}

/// Counters of one stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Requests handed to the transport
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
    pub wrong_order: u64,
    pub invalid: u64,
    /// Sum of round-trip times in milliseconds
    pub latency_sum: u64,
    /// Number of round-trip samples
    pub latency_count: u64,
    /// Time of the most recent send
    pub last_send_time: Option<Timestamp>,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a dispatched request
    pub fn record_send(&mut self, now: Timestamp) {
        self.sent += 1;
        self.last_send_time = Some(now);
    }

    /// Count the outcome of a cycle
    ///
    /// Returns the round-trip time in milliseconds for `Received`.
    pub fn record(&mut self, outcome: Outcome, now: Timestamp) -> Option<u64> {
        match outcome {
            Outcome::Received => {
                self.received += 1;
                let rtt = self
                    .last_send_time
                    .map(|sent| now.offset_from(sent).max(0) as u64)
                    .unwrap_or(0);
                self.latency_sum = self.latency_sum.saturating_add(rtt);
                self.latency_count += 1;
                return Some(rtt);
            }
            Outcome::Dropped => self.dropped += 1,
            Outcome::WrongOrder => self.wrong_order += 1,
            Outcome::Invalid => self.invalid += 1,
        }
        None
    }

    /// Cycles that reached an outcome
    pub fn completed(&self) -> u64 {
        self.received + self.dropped + self.wrong_order + self.invalid
    }

    /// Mean round-trip time in microseconds (0 without samples)
    pub fn mean_rtt_us(&self) -> u64 {
        if self.latency_count == 0 {
            0
        } else {
            self.latency_sum.saturating_mul(1000) / self.latency_count
        }
    }
}

/// Statistics of every stream plus the shared report deadline
pub struct StatsAggregator {
    streams: RwLock<BTreeMap<StreamId, Arc<RwLock<StreamStats>>>>,
    schedule: Mutex<ReportSchedule>,
    sink: Box<dyn ReportSink>,
}

impl StatsAggregator {
    pub fn new(interval: Duration, slack: Duration, sink: Box<dyn ReportSink>) -> Self {
        StatsAggregator {
            streams: RwLock::new(BTreeMap::new()),
            schedule: Mutex::new(ReportSchedule::new(interval, slack)),
            sink,
        }
    }

    /// Add a stream; registering twice keeps the existing counters
    pub fn register(&self, id: StreamId) -> Arc<RwLock<StreamStats>> {
        self.streams
            .write()
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(StreamStats::new())))
            .clone()
    }

    fn entry(&self, id: StreamId) -> Option<Arc<RwLock<StreamStats>>> {
        self.streams.read().get(&id).cloned()
    }

    pub fn record_send(&self, id: StreamId, now: Timestamp) {
        match self.entry(id) {
            Some(stats) => stats.write().record_send(now),
            None => warn!(stream = %id, "send for unregistered stream"),
        }
    }

    /// Count an outcome for one stream, returning the RTT sample if any
    pub fn record_outcome(&self, id: StreamId, outcome: Outcome, now: Timestamp) -> Option<u64> {
        match self.entry(id) {
            Some(stats) => stats.write().record(outcome, now),
            None => {
                warn!(stream = %id, ?outcome, "outcome for unregistered stream");
                None
            }
        }
    }

    pub fn snapshot(&self, id: StreamId) -> Option<StreamStats> {
        self.entry(id).map(|stats| stats.read().clone())
    }

    /// Copy of every stream's counters, ordered by stream
    pub fn snapshot_all(&self) -> Vec<(StreamId, StreamStats)> {
        self.streams
            .read()
            .iter()
            .map(|(id, stats)| (*id, stats.read().clone()))
            .collect()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    fn build_report(&self, now: Timestamp) -> Report {
        Report {
            at: now,
            rows: self
                .snapshot_all()
                .iter()
                .map(|(id, stats)| ReportRow::new(*id, stats))
                .collect(),
        }
    }

    /// Emit a report if the shared deadline has come up
    ///
    /// Safe to call from every stream on every event; at most one caller
    /// emits per interval.
    pub fn maybe_report(&self, now: Timestamp) -> Option<Report> {
        let due = self.schedule.lock().poll(now) == Poll::Due;
        if !due {
            return None;
        }
        let report = self.build_report(now);
        self.sink.emit(&report);
        Some(report)
    }

    /// Emit a report regardless of the schedule
    pub fn report_now(&self, now: Timestamp) -> Report {
        let report = self.build_report(now);
        self.sink.emit(&report);
        report
    }
}

impl std::fmt::Debug for StatsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsAggregator")
            .field("streams", &self.stream_count())
            .field("schedule", &*self.schedule.lock())
            .finish()
    }
}
