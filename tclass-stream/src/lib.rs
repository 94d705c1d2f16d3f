//! Priority-class echo streams
//!
//! One [`Stream`] per (address family, priority class) sends a sequenced
//! request, waits a bounded time for its echo and classifies the outcome.
//! The [`Runner`] brings the streams up over a [`Transport`] and drives them;
//! the [`StatsAggregator`] collects per-stream counters and emits periodic
//! reports.

pub mod config;
pub mod echo;
pub mod id;
pub mod report;
pub mod runner;
pub mod stats;
pub mod stream;
pub mod transport;
pub mod udp;

pub use config::{ConfigError, FamilyPeers, PeerPolicy, RetryPolicy, RunnerConfig, StreamConfig};
pub use echo::{EchoResponder, EchoStats};
pub use id::{Family, StreamId};
pub use report::{Report, ReportRow, ReportSchedule, ReportSink, TracingSink};
pub use runner::{RunSummary, Runner, RunnerError, RunnerHandle, WorkerExit};
pub use stats::{Outcome, StatsAggregator, StreamStats};
pub use stream::{Dispatch, Stream, StreamError, StreamState};
pub use transport::{
    Event, ReplySink, Session, SessionRequest, StreamEvent, Transport, TransportError,
};
pub use udp::{UdpSession, UdpTransport};
