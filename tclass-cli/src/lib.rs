//! tclass CLI Library
//!
//! Shared functionality for the tclass command-line tools.

pub mod config;
pub mod stats;

pub use config::{ClientConfig, Config, EchoConfig, PeerPairConfig, PeerPolicyConfig, ReportStyle};
pub use stats::{format_rtt, render_report, TableSink};
