//! UDP multicast transport for the command/status protocol (spec §6).
//! Grounded on the send/receive-non-blocking shape of a plain
//! `UdpSocket`-based transport: bind, set a read timeout, send datagrams
//! to the multicast group, drain pending datagrams without blocking.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

/// One inbound datagram, with the sender's address for reply routing.
pub struct Received {
    pub payload: Vec<u8>,
    pub from: SocketAddr,
}

/// Sends to, and receives from, one UDP multicast group. Used for both the
/// command listener and the status emitter; a single socket can serve both
/// roles since the protocol multiplexes by packet kind (spec §6).
pub struct MulticastTransport {
    socket: UdpSocket,
    group: SocketAddrV4,
}

impl MulticastTransport {
    /// Binds to `group`'s port on all interfaces and joins the multicast
    /// group so datagrams sent to it are received locally. `read_timeout`
    /// bounds how long `recv` blocks when no datagram is pending.
    pub fn join(group: SocketAddrV4, read_timeout: Duration) -> io::Result<Self> {
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port());
        let socket = UdpSocket::bind(bind_addr)?;
        socket.join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)?;
        socket.set_read_timeout(Some(read_timeout))?;
        Ok(Self { socket, group })
    }

    pub fn send(&self, payload: &[u8]) -> io::Result<()> {
        self.socket.send_to(payload, self.group)?;
        Ok(())
    }

    /// Blocks up to the configured read timeout for the next datagram;
    /// returns `Ok(None)` on timeout rather than an error.
    pub fn recv(&self) -> io::Result<Option<Received>> {
        let mut buf = vec![0u8; 65536];
        match self.socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                buf.truncate(len);
                Ok(Some(Received { payload: buf, from }))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_multicast_send_and_receive() {
        // IP_MULTICAST_LOOP defaults to enabled, so a socket that has joined
        // the group receives its own datagrams sent to that group.
        let group: SocketAddrV4 = "239.192.1.2:17235".parse().unwrap();
        let transport = MulticastTransport::join(group, Duration::from_millis(500)).expect("join should succeed");

        transport.send(b"hello").expect("send should succeed");
        let received = transport
            .recv()
            .expect("recv should not error")
            .expect("should receive its own looped-back datagram");
        assert_eq!(received.payload, b"hello");
    }
}
