//! UDP socket wrapper for priority-tagged probe sessions
//!
//! Each stream owns one connected UDP socket. The stream's priority class is
//! applied as a QoS hint: the IPv4 TOS byte or the IPv6 traffic class is set
//! to the DSCP class selector for that priority.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Highest priority class that maps onto a DSCP class selector
pub const MAX_PRIORITY: u8 = 7;

/// Socket configuration errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid socket address")]
    InvalidAddress,

    #[error("Socket option not supported on this platform")]
    UnsupportedOption,

    #[error("Priority {0} out of range (max 7)")]
    InvalidPriority(u8),
}

impl SocketError {
    /// Whether the operation may succeed if simply tried again
    pub fn is_transient(&self) -> bool {
        match self {
            SocketError::Io(e) => matches!(
                e.kind(),
                ErrorKind::WouldBlock
                    | ErrorKind::Interrupted
                    | ErrorKind::TimedOut
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::AddrNotAvailable
                    | ErrorKind::OutOfMemory
            ),
            _ => false,
        }
    }

    /// Whether this is a read timeout rather than a real failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, SocketError::Io(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut))
    }
}

/// TOS / traffic class byte for a priority class (DSCP CS0..CS7)
#[inline]
pub fn tos_for_priority(priority: u8) -> u32 {
    u32::from(priority) << 5
}

/// Priority class carried in a TOS / traffic class byte
#[inline]
pub fn priority_from_tos(tos: u32) -> u8 {
    ((tos >> 5) & 0x07) as u8
}

/// Probe socket
///
/// Wraps a blocking UDP socket. Reads honour the configured read timeout.
pub struct ProbeSocket {
    inner: Socket,
}

impl ProbeSocket {
    /// Create a socket bound to the given address
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if addr.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        socket.bind(&addr.into())?;

        Ok(ProbeSocket { inner: socket })
    }

    /// Create a socket on `local` and connect it to `peer`
    ///
    /// A connected UDP socket only accepts datagrams from its peer, so
    /// replies can be attributed to the session without inspecting the
    /// source address.
    pub fn connect(local: SocketAddr, peer: SocketAddr) -> Result<Self, SocketError> {
        if local.is_ipv4() != peer.is_ipv4() {
            return Err(SocketError::InvalidAddress);
        }

        let socket = Self::bind(local)?;
        socket.inner.connect(&peer.into())?;
        Ok(socket)
    }

    /// Tag outgoing traffic with a priority class
    pub fn set_priority(&self, priority: u8) -> Result<(), SocketError> {
        if priority > MAX_PRIORITY {
            return Err(SocketError::InvalidPriority(priority));
        }

        let tos = tos_for_priority(priority);
        let local = self.local_addr()?;
        if local.is_ipv4() {
            self.set_tos_v4(tos)?;
        } else {
            self.set_tclass_v6(tos)?;
        }
        trace!(%local, priority, tos, "priority tag applied");
        Ok(())
    }

    /// Priority class currently applied to outgoing traffic
    pub fn priority(&self) -> Result<u8, SocketError> {
        let tos = if self.local_addr()?.is_ipv4() {
            self.tos_v4()?
        } else {
            self.tclass_v6()?
        };
        Ok(priority_from_tos(tos))
    }

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
    fn set_tos_v4(&self, tos: u32) -> Result<(), SocketError> {
        Ok(self.inner.set_tos(tos)?)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
    fn set_tos_v4(&self, _tos: u32) -> Result<(), SocketError> {
        Err(SocketError::UnsupportedOption)
    }

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
    fn tos_v4(&self) -> Result<u32, SocketError> {
        Ok(self.inner.tos()?)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
    fn tos_v4(&self) -> Result<u32, SocketError> {
        Err(SocketError::UnsupportedOption)
    }

    #[cfg(target_os = "linux")]
    fn set_tclass_v6(&self, tclass: u32) -> Result<(), SocketError> {
        Ok(self.inner.set_tclass_v6(tclass)?)
    }

    #[cfg(not(target_os = "linux"))]
    fn set_tclass_v6(&self, _tclass: u32) -> Result<(), SocketError> {
        Err(SocketError::UnsupportedOption)
    }

    #[cfg(target_os = "linux")]
    fn tclass_v6(&self) -> Result<u32, SocketError> {
        Ok(self.inner.tclass_v6()?)
    }

    #[cfg(not(target_os = "linux"))]
    fn tclass_v6(&self) -> Result<u32, SocketError> {
        Err(SocketError::UnsupportedOption)
    }

    /// Bound the time a blocking read may wait
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), SocketError> {
        self.inner.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner
            .local_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)
    }

    /// Get the peer of a connected socket
    pub fn peer_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner
            .peer_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)
    }

    /// Send a datagram to the connected peer
    pub fn send(&self, buf: &[u8]) -> Result<usize, SocketError> {
        Ok(self.inner.send(buf)?)
    }

    /// Send a datagram to the given address
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, &target.into())?)
    }

    /// Receive a datagram from the connected peer
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, SocketError> {
        Ok(self.recv_from(buf)?.0)
    }

    /// Receive a datagram and its source address
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        // socket2 reads into MaybeUninit; an initialised buffer is a valid one
        use std::mem::MaybeUninit;
        let uninit_buf = unsafe {
            std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut MaybeUninit<u8>, buf.len())
        };

        let (n, addr) = self.inner.recv_from(uninit_buf)?;
        Ok((n, addr.as_socket().ok_or(SocketError::InvalidAddress)?))
    }
}
