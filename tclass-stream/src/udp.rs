//! UDP transport
//!
//! Each session is a connected [`ProbeSocket`] tagged with the stream's
//! priority class, plus a reader thread that forwards every datagram to the
//! session's [`ReplySink`]. Dropping the session stops and joins the reader.

use crate::transport::{ReplySink, Session, SessionRequest, Transport, TransportError};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tclass_io::{ProbeSocket, SocketError};
use tracing::{debug, warn};

/// Opens connected UDP sessions
#[derive(Debug, Clone)]
pub struct UdpTransport {
    /// How often the reader wakes to check for shutdown
    pub read_timeout: Duration,
    /// Largest datagram the reader accepts
    pub recv_buffer: usize,
}

impl Default for UdpTransport {
    fn default() -> Self {
        UdpTransport {
            read_timeout: Duration::from_millis(100),
            recv_buffer: 2048,
        }
    }
}

impl UdpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for UdpTransport {
    type Session = UdpSession;

    fn open_session(
        &self,
        request: &SessionRequest,
        replies: ReplySink,
    ) -> Result<UdpSession, TransportError> {
        let socket = ProbeSocket::connect(request.local, request.peer)?;
        let id = request.stream;

        match socket.set_priority(id.priority) {
            Ok(()) => match socket.priority() {
                Ok(applied) => debug!(stream = %id, priority = applied, "priority applied"),
                Err(e) => debug!(stream = %id, error = %e, "cannot read back priority"),
            },
            Err(SocketError::UnsupportedOption) => {
                warn!(stream = %id, "priority tagging unsupported on this platform")
            }
            Err(e) => return Err(e.into()),
        }

        socket.set_read_timeout(Some(self.read_timeout))?;
        let socket = Arc::new(socket);
        let stop = Arc::new(AtomicBool::new(false));

        let reader = {
            let socket = socket.clone();
            let stop = stop.clone();
            let buffer = self.recv_buffer;
            thread::Builder::new()
                .name(format!("tclass-rx-{}-{}", id.family.tag(), id.priority))
                .spawn(move || read_loop(&socket, &replies, &stop, buffer))
                .map_err(SocketError::from)?
        };

        debug!(
            stream = %id,
            local = ?socket.local_addr().ok(),
            peer = %request.peer,
            "session open"
        );

        Ok(UdpSession {
            socket,
            stop,
            reader: Some(reader),
        })
    }
}

fn read_loop(socket: &ProbeSocket, replies: &ReplySink, stop: &AtomicBool, buffer: usize) {
    let mut buf = vec![0u8; buffer];

    while !stop.load(Ordering::Relaxed) {
        match socket.recv(&mut buf) {
            Ok(n) => {
                if !replies.deliver(Bytes::copy_from_slice(&buf[..n])) {
                    break;
                }
            }
            Err(e) if e.is_transient() => continue,
            Err(e) => {
                replies.report_error(&e);
                break;
            }
        }
    }
    debug!(stream = %replies.stream(), "reader stopped");
}

/// One stream's UDP session
pub struct UdpSession {
    socket: Arc<ProbeSocket>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl UdpSession {
    pub fn socket(&self) -> &ProbeSocket {
        &self.socket
    }
}

impl Session for UdpSession {
    fn send(&mut self, datagram: &[u8]) -> Result<(), TransportError> {
        let sent = self.socket.send(datagram)?;
        if sent != datagram.len() {
            return Err(TransportError::ShortSend {
                sent,
                expected: datagram.len(),
            });
        }
        Ok(())
    }
}

impl Drop for UdpSession {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{Family, StreamId};
    use crate::transport::Event;
    use crossbeam::channel::unbounded;

    #[test]
    fn test_session_round_trip() {
        let peer = ProbeSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let (tx, rx) = unbounded();
        let id = StreamId::new(Family::Ipv4, 1);
        let request = SessionRequest {
            stream: id,
            peer: peer.local_addr().unwrap(),
            local: "127.0.0.1:0".parse().unwrap(),
        };
        let mut session = UdpTransport::new()
            .open_session(&request, ReplySink::new(id, tx))
            .unwrap();

        session.send(b"hello").unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        peer.send_to(&buf[..n], from).unwrap();

        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            Event::Reply { stream, datagram } => {
                assert_eq!(stream, id);
                assert_eq!(&datagram[..], b"hello");
            }
            other => panic!("unexpected event {:?}", other),
        }

        drop(session);
    }
}
