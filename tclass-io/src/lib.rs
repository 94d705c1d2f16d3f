//! tclass I/O and Platform Abstraction
//!
//! UDP socket wrapper with priority tagging, and the uptime clock used for
//! probe timestamps, retry deadlines and report scheduling.

pub mod socket;
pub mod time;

pub use socket::{priority_from_tos, tos_for_priority, ProbeSocket, SocketError, MAX_PRIORITY};
pub use time::{Clock, ManualClock, MonotonicClock, Timestamp, UPTIME_WRAP};
