//! tclass echo - reflects probe datagrams back to the client

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use tclass_cli::{Config, EchoConfig};
use tclass_stream::EchoResponder;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tclass-echo")]
#[command(about = "UDP echo responder for tclass-client", long_about = None)]
struct Args {
    /// Configuration file (TOML, [echo] section)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (repeatable)
    #[arg(short, long)]
    listen: Vec<SocketAddr>,

    /// Write an example configuration to this path and exit
    #[arg(long)]
    example_config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
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
        Config::example_echo().to_file(path)?;
        tracing::info!("Example configuration written to {}", path.display());
        return Ok(());
    }

    let mut echo = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?
            .echo
            .unwrap_or_default(),
        None => EchoConfig::default(),
    };
    if !args.listen.is_empty() {
        echo.listen = args.listen.clone();
    }
    echo.validate()?;

    let running = Arc::new(AtomicBool::new(true));
    let mut workers = Vec::new();
    for addr in &echo.listen {
        let responder =
            EchoResponder::bind(*addr).with_context(|| format!("Failed to bind {}", addr))?;
        let running = running.clone();
        let handle = thread::Builder::new()
            .name(format!("tclass-echo-{}", addr.port()))
            .spawn(move || responder.serve(&running))?;
        workers.push((*addr, handle));
    }

    for (addr, handle) in workers {
        match handle.join() {
            Ok(Ok(stats)) => tracing::info!("{}: echoed {} datagrams", addr, stats.datagrams),
            Ok(Err(e)) => tracing::error!("{}: responder failed: {}", addr, e),
            Err(_) => tracing::error!("{}: responder panicked", addr),
        }
    }
    Ok(())
}
