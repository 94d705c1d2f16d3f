//! tclass - priority-class UDP echo traffic
//!
//! High-level API over the protocol, I/O and stream crates.

pub use tclass_io as io;
pub use tclass_protocol as protocol;
pub use tclass_stream as stream;

// Re-export commonly used types
pub use io::{Clock, MonotonicClock, Timestamp};
pub use protocol::{PayloadSource, SeqNumber, WireHeader};
pub use stream::{
    EchoResponder, Family, Outcome, Report, Runner, RunnerConfig, RunnerHandle, StatsAggregator,
    Stream, StreamId, StreamStats, UdpTransport,
};
