//! Periodic statistics reports
//!
//! All streams share one report deadline. The first poll only arms it, so
//! nothing is printed for the empty warm-up window. After that a poll at or
//! past the deadline emits one snapshot and re-arms the deadline one interval
//! after that poll, so two reports are always a full interval apart.
//! Deadlines live on the wrapping uptime circle of
//! [`tclass_io::time`], so a deadline that crossed the overflow boundary is
//! still compared correctly.

use crate::id::StreamId;
use crate::stats::StreamStats;
use std::fmt;
use std::time::Duration;
use tclass_io::Timestamp;
use tracing::{debug, info};

/// Result of polling the schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// First poll: deadline armed, nothing to report
    Armed,
    /// Deadline not reached
    Pending,
    /// Deadline reached within the slack: report now
    Due,
    /// Deadline missed by more than the slack: re-armed from now, no report
    Resynced,
}

/// Shared report deadline
#[derive(Debug, Clone)]
pub struct ReportSchedule {
    interval_ms: i64,
    slack_ms: i64,
    next: Option<Timestamp>,
}

impl ReportSchedule {
    pub fn new(interval: Duration, slack: Duration) -> Self {
        let to_ms = |d: Duration| i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
        ReportSchedule {
            interval_ms: to_ms(interval).max(1),
            slack_ms: to_ms(slack),
            next: None,
        }
    }

    /// Deadline of the next report, once armed
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.next
    }

    /// Advance the schedule for an event observed at `now`
    pub fn poll(&mut self, now: Timestamp) -> Poll {
        let Some(deadline) = self.next else {
            self.next = Some(now.wrapping_add_millis(self.interval_ms));
            return Poll::Armed;
        };

        let late_by = now.offset_from(deadline);
        if late_by < 0 {
            return Poll::Pending;
        }

        self.next = Some(now.wrapping_add_millis(self.interval_ms));
        if late_by <= self.slack_ms {
            Poll::Due
        } else {
            debug!(late_by_ms = late_by, "report deadline missed, re-arming");
            Poll::Resynced
        }
    }
}

/// One line of a report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub stream: StreamId,
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
    pub wrong_order: u64,
    pub invalid: u64,
    /// Mean round-trip time in microseconds, 0 without samples
    pub mean_rtt_us: u64,
}

impl ReportRow {
    pub fn new(stream: StreamId, stats: &StreamStats) -> Self {
        ReportRow {
            stream,
            sent: stats.sent,
            received: stats.received,
            dropped: stats.dropped,
            wrong_order: stats.wrong_order,
            invalid: stats.invalid,
            mean_rtt_us: stats.mean_rtt_us(),
        }
    }
}

impl fmt::Display for ReportRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}\t{}\t{}\t{}\t{}\t{}",
            self.stream.family.tag(),
            self.stream.priority,
            self.sent,
            self.received,
            self.dropped,
            self.wrong_order,
            self.mean_rtt_us
        )
    }
}

/// Snapshot of every stream at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub at: Timestamp,
    pub rows: Vec<ReportRow>,
}

/// Destination for reports
pub trait ReportSink: Send + Sync {
    fn emit(&self, report: &Report);
}

/// Writes reports through `tracing` at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn emit(&self, report: &Report) {
        info!("Traffic class statistics:");
        info!("   Prio\tSent\tRecv\tDrop\tMiss\tTime (us)");
        for row in &report.rows {
            info!("{}", row);
        }
        info!("---");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Family;
    use tclass_io::UPTIME_WRAP;

    fn at(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn test_first_poll_only_arms() {
        let mut schedule = ReportSchedule::new(Duration::from_secs(30), Duration::from_secs(30));
        assert_eq!(schedule.poll(at(1_000)), Poll::Armed);
        assert_eq!(schedule.next_deadline(), Some(at(31_000)));
    }

    #[test]
    fn test_fires_once_per_interval() {
        let mut schedule = ReportSchedule::new(Duration::from_secs(30), Duration::from_secs(30));
        schedule.poll(at(0));

        assert_eq!(schedule.poll(at(29_999)), Poll::Pending);
        assert_eq!(schedule.poll(at(30_000)), Poll::Due);
        assert_eq!(schedule.poll(at(30_001)), Poll::Pending);
        assert_eq!(schedule.poll(at(45_000)), Poll::Pending);
        assert_eq!(schedule.poll(at(60_500)), Poll::Due);
        assert_eq!(schedule.next_deadline(), Some(at(90_500)));
    }

    #[test]
    fn test_late_report_rearms_from_now() {
        let mut schedule = ReportSchedule::new(Duration::from_secs(30), Duration::from_secs(30));
        schedule.poll(at(0));

        assert_eq!(schedule.poll(at(59_000)), Poll::Due);
        assert_eq!(schedule.next_deadline(), Some(at(89_000)));
        assert_eq!(schedule.poll(at(60_000)), Poll::Pending);
        assert_eq!(schedule.poll(at(88_999)), Poll::Pending);
        assert_eq!(schedule.poll(at(89_000)), Poll::Due);
    }

    #[test]
    fn test_missed_deadline_resyncs() {
        let mut schedule = ReportSchedule::new(Duration::from_secs(30), Duration::from_secs(5));
        schedule.poll(at(0));

        assert_eq!(schedule.poll(at(100_000)), Poll::Resynced);
        assert_eq!(schedule.next_deadline(), Some(at(130_000)));
        assert_eq!(schedule.poll(at(100_001)), Poll::Pending);
        assert_eq!(schedule.poll(at(130_000)), Poll::Due);
    }

    #[test]
    fn test_deadline_across_overflow() {
        let mut schedule = ReportSchedule::new(Duration::from_secs(30), Duration::from_secs(30));
        let start = at(UPTIME_WRAP - 10_000);

        assert_eq!(schedule.poll(start), Poll::Armed);
        // 30 s after start lands 20 s past the wrap
        assert_eq!(schedule.next_deadline(), Some(at(20_000)));

        // Still before the wrapped deadline: must not retrigger
        assert_eq!(schedule.poll(at(UPTIME_WRAP - 1)), Poll::Pending);
        assert_eq!(schedule.poll(at(0)), Poll::Pending);
        assert_eq!(schedule.poll(at(19_999)), Poll::Pending);
        assert_eq!(schedule.poll(at(20_000)), Poll::Due);
        assert_eq!(schedule.next_deadline(), Some(at(50_000)));
    }

    #[test]
    fn test_row_format() {
        let row = ReportRow {
            stream: StreamId::new(Family::Ipv6, 2),
            sent: 3,
            received: 1,
            dropped: 1,
            wrong_order: 1,
            invalid: 0,
            mean_rtt_us: 500_000,
        };
        assert_eq!(row.to_string(), "v6 2\t3\t1\t1\t1\t500000");
    }
}
