//! Echo responder: reflects every datagram back to its sender

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tclass_io::{ProbeSocket, SocketError};
use tracing::{debug, info, warn};

/// Counters for a responder run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EchoStats {
    pub datagrams: u64,
    pub bytes: u64,
    pub errors: u64,
}

pub struct EchoResponder {
    socket: ProbeSocket,
    recv_buffer: usize,
}

impl EchoResponder {
    /// Listen on `addr`
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let socket = ProbeSocket::bind(addr)?;
        socket.set_read_timeout(Some(Duration::from_millis(200)))?;
        Ok(EchoResponder {
            socket,
            recv_buffer: 2048,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.socket.local_addr()
    }

    /// Echo until `running` is cleared
    pub fn serve(&self, running: &AtomicBool) -> Result<EchoStats, SocketError> {
        let mut buf = vec![0u8; self.recv_buffer];
        let mut stats = EchoStats::default();
        info!(addr = ?self.local_addr().ok(), "echo responder listening");

        while running.load(Ordering::Relaxed) {
            let (n, from) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.is_transient() => continue,
                Err(e) => return Err(e),
            };

            match self.socket.send_to(&buf[..n], from) {
                Ok(_) => {
                    stats.datagrams += 1;
                    stats.bytes += n as u64;
                    debug!(%from, len = n, "echoed");
                }
                Err(e) => {
                    stats.errors += 1;
                    warn!(%from, error = %e, "echo failed");
                }
            }
        }

        info!(datagrams = stats.datagrams, bytes = stats.bytes, "echo responder stopped");
        Ok(stats)
    }
}
