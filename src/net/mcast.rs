//! UDP multicast transport for the market-data channels.
//!
//! A socket is either a publisher (connected to the group, never joined) or a
//! subscriber (bound to the group port with `SO_REUSEADDR` so several
//! participants can share a host, joined on demand). Records are staged one
//! per datagram and flushed non-blockingly; received datagrams append into a
//! reassembly buffer the caller frames with [`crate::wire::Records`].

use super::NetError;
use crate::types::Nanos;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::os::fd::FromRawFd;
use tracing::{trace, warn};

/// Size of the receive reassembly buffer.
const RECV_BUFFER_SIZE: usize = 1 << 20;

/// One multicast endpoint, sending or receiving fixed-width records.
#[derive(Debug)]
pub struct McastSocket {
    sock: UdpSocket,
    group: Ipv4Addr,
    joined: bool,
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
    /// Datagram boundaries inside `send_buf`.
    send_lens: Vec<usize>,
}

impl McastSocket {
    /// Creates a publisher socket connected to `group:port`. Datagrams loop
    /// back locally so same-host participants see the stream.
    pub fn publisher(group: Ipv4Addr, port: u16) -> Result<Self, NetError> {
        if !group.is_multicast() {
            return Err(NetError::BadAddress {
                addr: group.to_string(),
                reason: "not a multicast group".into(),
            });
        }
        let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        sock.connect(SocketAddrV4::new(group, port))?;
        sock.set_nonblocking(true)?;
        sock.set_multicast_loop_v4(true)?;
        Ok(Self::wrap(sock, group))
    }

    /// Creates a subscriber socket bound to the group's port with address
    /// reuse. Does not join the group yet; see [`McastSocket::join`].
    pub fn subscriber(group: Ipv4Addr, port: u16) -> Result<Self, NetError> {
        if !group.is_multicast() {
            return Err(NetError::BadAddress {
                addr: group.to_string(),
                reason: "not a multicast group".into(),
            });
        }
        let sock = bind_reuse(port)?;
        sock.set_nonblocking(true)?;
        Ok(Self::wrap(sock, group))
    }

    fn wrap(sock: UdpSocket, group: Ipv4Addr) -> Self {
        McastSocket {
            sock,
            group,
            joined: false,
            recv_buf: Vec::with_capacity(RECV_BUFFER_SIZE),
            send_buf: Vec::new(),
            send_lens: Vec::new(),
        }
    }

    /// Adds membership so the kernel delivers the group's datagrams.
    pub fn join(&mut self) -> Result<(), NetError> {
        self.sock.join_multicast_v4(&self.group, &Ipv4Addr::UNSPECIFIED)?;
        self.joined = true;
        trace!(group = %self.group, "joined multicast group");
        Ok(())
    }

    /// Drops membership; datagrams stop arriving once the kernel processes
    /// the leave.
    pub fn leave(&mut self) {
        if self.joined {
            if let Err(e) = self.sock.leave_multicast_v4(&self.group, &Ipv4Addr::UNSPECIFIED) {
                warn!(group = %self.group, error = %e, "leave_multicast failed");
            }
            self.joined = false;
            self.recv_buf.clear();
        }
    }

    /// Whether the socket currently has group membership.
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Stages `record` as its own datagram for the next flush.
    pub fn stage(&mut self, record: &[u8]) {
        self.send_buf.extend_from_slice(record);
        self.send_lens.push(record.len());
    }

    /// One receive attempt plus a flush of everything staged. Returns whether
    /// new bytes arrived; `on_recv` sees the reassembly buffer and returns
    /// how many bytes it consumed.
    pub fn send_and_recv(&mut self, mut on_recv: impl FnMut(&[u8], Nanos) -> usize) -> bool {
        let received = match self.recv_once() {
            Ok(n) => n > 0,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => {
                warn!(error = %e, "multicast recv failed");
                false
            }
        };
        if received {
            let rx_ns = crate::types::now_nanos();
            let consumed = on_recv(&self.recv_buf, rx_ns);
            self.recv_buf.drain(..consumed);
        }
        self.flush();
        received
    }

    fn recv_once(&mut self) -> io::Result<usize> {
        let mut scratch = [0u8; 2048];
        let n = self.sock.recv(&mut scratch)?;
        if self.recv_buf.len() + n > RECV_BUFFER_SIZE {
            warn!("multicast reassembly buffer overflow, discarding stale bytes");
            self.recv_buf.clear();
        }
        self.recv_buf.extend_from_slice(&scratch[..n]);
        Ok(n)
    }

    /// Sends each staged record as its own datagram, non-blockingly.
    pub fn flush(&mut self) {
        let mut offset = 0;
        for &len in &self.send_lens {
            let datagram = &self.send_buf[offset..offset + len];
            match self.sock.send(datagram) {
                Ok(sent) if sent != len => {
                    warn!(len, sent, "short multicast send");
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    warn!("multicast send would block, dropping datagram");
                }
                Err(e) => warn!(error = %e, "multicast send failed"),
            }
            offset += len;
        }
        self.send_buf.clear();
        self.send_lens.clear();
    }
}

impl Drop for McastSocket {
    fn drop(&mut self) {
        self.leave();
    }
}

/// Binds a UDP socket to `0.0.0.0:port` with `SO_REUSEADDR`, so multiple
/// subscribers on one host can share the group port.
fn bind_reuse(port: u16) -> io::Result<UdpSocket> {
    // std's bind offers no way to set options first; create the socket raw.
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let sock = UdpSocket::from_raw_fd(fd);

        let one: libc::c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            (&raw const one).cast(),
            size_of::<libc::c_int>() as libc::socklen_t,
        ) != 0
        {
            return Err(io::Error::last_os_error());
        }

        let addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: port.to_be(),
            sin_addr: libc::in_addr { s_addr: 0 },
            sin_zero: [0; 8],
        };
        if libc::bind(
            fd,
            (&raw const addr).cast(),
            size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ) != 0
        {
            return Err(io::Error::last_os_error());
        }
        Ok(sock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unicast_groups() {
        let err = McastSocket::publisher(Ipv4Addr::new(127, 0, 0, 1), 9000).unwrap_err();
        assert!(matches!(err, NetError::BadAddress { .. }));
    }

    #[test]
    fn stage_tracks_datagram_boundaries() {
        let mut sock = McastSocket::publisher(Ipv4Addr::new(239, 255, 0, 1), 20001).unwrap();
        sock.stage(&[1, 2, 3]);
        sock.stage(&[4, 5]);
        assert_eq!(sock.send_lens, vec![3, 2]);
        assert_eq!(sock.send_buf, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn subscriber_join_and_leave() {
        let mut sock = McastSocket::subscriber(Ipv4Addr::new(239, 255, 0, 7), 0).unwrap();
        assert!(!sock.is_joined());
        if sock.join().is_ok() {
            assert!(sock.is_joined());
            sock.leave();
        }
        assert!(!sock.is_joined());
    }
}
