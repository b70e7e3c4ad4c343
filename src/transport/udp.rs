use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::Result;

/// A UDP endpoint with a bounded read timeout.
///
/// Every blocking receive in the library goes through [`recv_from`]
/// (Self::recv_from), which turns a timeout into `Ok(None)` so callers
/// can re-check their cancellation flag and loop. Cancellation latency
/// is therefore bounded by the timeout passed to [`bind`](Self::bind);
/// no blocked call is ever interrupted from outside.
///
/// Each endpoint is owned by exactly one activity (signalling exchange
/// or media loop) for its lifetime and closed only when that activity's
/// loop exits.
pub struct UdpEndpoint {
    socket: UdpSocket,
}

impl UdpEndpoint {
    /// Bind a socket with the given read timeout.
    pub fn bind(addr: SocketAddr, read_timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(read_timeout))?;
        tracing::debug!(addr = %socket.local_addr()?, ?read_timeout, "UDP endpoint bound");
        Ok(UdpEndpoint { socket })
    }

    /// The locally bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send raw bytes to a specific socket address.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(payload, addr)?)
    }

    /// Receive one datagram, or `None` when the bounded wait elapses.
    ///
    /// Only timeouts map to `None`; real socket failures surface as
    /// [`VoipError::Io`](crate::error::VoipError::Io).
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((len, addr)) => Ok(Some((len, addr))),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
