//! tclass client - per-priority UDP echo streams
//!
//! Opens one stream per priority class and address family against one or two
//! echo responders and reports delivery, ordering and round-trip time.

use anyhow::Context;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tclass_cli::{ClientConfig, Config, PeerPairConfig, PeerPolicyConfig, ReportStyle, TableSink};
use tclass::MonotonicClock;
use tclass_stream::{ReportSink, Runner, TracingSink, UdpTransport};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tclass-client")]
#[command(about = "Priority-class UDP echo client", long_about = None)]
struct Args {
    /// Configuration file (TOML, [client] section)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IPv4 responders: peer A, optionally peer B
    #[arg(long = "ipv4", num_args = 1..=2)]
    ipv4: Vec<IpAddr>,

    /// IPv6 responders: peer A, optionally peer B
    #[arg(long = "ipv6", num_args = 1..=2)]
    ipv6: Vec<IpAddr>,

    /// Responder port
    #[arg(short, long)]
    port: Option<u16>,

    /// Local port base (0 for ephemeral)
    #[arg(long)]
    local_port: Option<u16>,

    /// Number of priority classes
    #[arg(long)]
    classes: Option<u8>,

    /// Echo wait window in milliseconds
    #[arg(long)]
    wait_ms: Option<u64>,

    /// Statistics interval in seconds
    #[arg(long)]
    stats: Option<u64>,

    /// Send every class to the first responder
    #[arg(long)]
    primary_only: bool,

    /// Fixed RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Print reports as a table on stdout
    #[arg(long)]
    table: bool,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Write an example configuration to this path and exit
    #[arg(long)]
    example_config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn peer_pair(addrs: &[IpAddr]) -> Option<PeerPairConfig> {
    addrs.first().map(|primary| PeerPairConfig {
        primary: *primary,
        secondary: addrs.get(1).copied(),
    })
}

fn apply_overrides(mut client: ClientConfig, args: &Args) -> ClientConfig {
    if let Some(peers) = peer_pair(&args.ipv4) {
        client.ipv4 = Some(peers);
    }
    if let Some(peers) = peer_pair(&args.ipv6) {
        client.ipv6 = Some(peers);
    }
    if let Some(port) = args.port {
        client.peer_port = port;
    }
    if let Some(port) = args.local_port {
        client.local_port = port;
    }
    if let Some(classes) = args.classes {
        client.classes = classes;
    }
    if let Some(wait) = args.wait_ms {
        client.wait_ms = wait;
    }
    if let Some(interval) = args.stats {
        client.report_interval_secs = interval;
    }
    if args.primary_only {
        client.peer_policy = PeerPolicyConfig::Primary;
    }
    if args.seed.is_some() {
        client.seed = args.seed;
    }
    if args.table {
        client.report_style = ReportStyle::Table;
    }
    client
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Some(path) = &args.example_config {
        Config::example_client().to_file(path)?;
        tracing::info!("Example configuration written to {}", path.display());
        return Ok(());
    }

    let client = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?
            .client
            .ok_or_else(|| anyhow::anyhow!("No [client] section in {}", path.display()))?,
        None => ClientConfig::default(),
    };
    let client = apply_overrides(client, &args);
    client.validate()?;

    let sink: Box<dyn ReportSink> = match client.report_style {
        ReportStyle::Log => Box::new(TracingSink),
        ReportStyle::Table => Box::new(TableSink),
    };

    tracing::info!("tclass client starting...");
    let runner = Runner::new(
        UdpTransport::new(),
        client.to_runner_config(),
        Arc::new(MonotonicClock::new()),
        sink,
    )?;
    let handle = runner.start()?;
    tracing::info!("{} streams running", handle.active_streams());

    let summary = match args.duration {
        Some(secs) => {
            thread::sleep(Duration::from_secs(secs));
            handle.shutdown()
        }
        None => handle.wait(),
    };

    for (stream, reason) in &summary.retired {
        tracing::warn!("Stream {} stopped early: {}", stream, reason);
    }
    tracing::info!("tclass client finished");
    Ok(())
}
