//! Buffered non-blocking TCP connection.
//!
//! Each connection owns an append buffer per direction: inbound bytes
//! accumulate until the owner frames complete records out of them
//! ([`TcpConn::consume`] shifts the decoded prefix), outbound records are
//! staged and flushed once per cycle. Reads go through `recvmsg` so the
//! kernel's `SO_TIMESTAMP` control message can be captured; that timestamp
//! is what the FIFO sequencer orders by.

use super::NetError;
use crate::types::{Nanos, now_nanos};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::AsRawFd;
use tracing::{trace, warn};

/// Capacity of each direction's append buffer.
pub const TCP_BUFFER_SIZE: usize = 1 << 20;

/// Outcome of one receive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvStatus {
    /// Bytes appended to the receive buffer at the carried kernel timestamp.
    Data(usize, Nanos),
    /// Nothing available this cycle.
    WouldBlock,
    /// Peer closed or errored; the connection should be dropped.
    Disconnected,
}

/// A non-blocking TCP connection with staged-send and reassembly buffers.
pub struct TcpConn {
    stream: TcpStream,
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
}

impl TcpConn {
    /// Adopts an accepted stream: non-blocking, no-delay, kernel receive
    /// timestamps enabled.
    pub fn from_accepted(stream: TcpStream) -> Result<Self, NetError> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        enable_rx_timestamps(&stream)?;
        Ok(TcpConn {
            stream,
            recv_buf: Vec::with_capacity(TCP_BUFFER_SIZE),
            send_buf: Vec::with_capacity(TCP_BUFFER_SIZE),
        })
    }

    /// Connects out to `addr` (the participant side of the order gateway),
    /// then switches the stream non-blocking.
    pub fn connect(addr: SocketAddr) -> Result<Self, NetError> {
        let stream = TcpStream::connect(addr)?;
        Self::from_accepted(stream)
    }

    /// The underlying raw fd, for epoll registration.
    pub(crate) fn raw_fd(&self) -> i32 {
        self.stream.as_raw_fd()
    }

    /// Unframed bytes received so far.
    pub fn buffer(&self) -> &[u8] {
        &self.recv_buf
    }

    /// Discards `n` decoded bytes from the front of the receive buffer.
    pub fn consume(&mut self, n: usize) {
        self.recv_buf.drain(..n);
    }

    /// Stages `bytes` for the next flush. Overflow means the peer stopped
    /// draining; the staged batch is dropped and logged.
    pub fn stage(&mut self, bytes: &[u8]) {
        if self.send_buf.len() + bytes.len() > TCP_BUFFER_SIZE {
            warn!(
                staged = self.send_buf.len(),
                extra = bytes.len(),
                "tcp send buffer overflow, dropping staged bytes"
            );
            self.send_buf.clear();
        }
        self.send_buf.extend_from_slice(bytes);
    }

    /// Whether anything is staged for sending.
    pub fn has_pending_send(&self) -> bool {
        !self.send_buf.is_empty()
    }

    /// One non-blocking `recvmsg` into the reassembly buffer, capturing the
    /// kernel receive timestamp when the control message carries one.
    pub fn recv(&mut self) -> RecvStatus {
        let fd = self.stream.as_raw_fd();
        self.recv_buf.reserve(4096);
        let spare = self.recv_buf.spare_capacity_mut();

        let mut iov = libc::iovec {
            iov_base: spare.as_mut_ptr().cast(),
            iov_len: spare.len(),
        };
        // Aligned control buffer; 64 bytes covers CMSG_SPACE(timeval).
        let mut ctrl = [0u64; 8];
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = ctrl.as_mut_ptr().cast();
        msg.msg_controllen = size_of_val(&ctrl);

        let n = unsafe { libc::recvmsg(fd, &mut msg, libc::MSG_DONTWAIT) };
        match n {
            0 => RecvStatus::Disconnected,
            n if n < 0 => {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => RecvStatus::WouldBlock,
                    _ => {
                        warn!(error = %err, "tcp recv failed");
                        RecvStatus::Disconnected
                    }
                }
            }
            n => {
                let n = n as usize;
                // SAFETY: recvmsg wrote `n` bytes into the spare capacity.
                unsafe { self.recv_buf.set_len(self.recv_buf.len() + n) };
                let rx_ns = kernel_timestamp(&msg).unwrap_or_else(now_nanos);
                trace!(fd, n, rx_ns, "tcp recv");
                RecvStatus::Data(n, rx_ns)
            }
        }
    }

    /// Flushes the staged bytes with a single non-blocking write. Short
    /// writes are logged and the remainder dropped; the kernel buffer is
    /// sized to make that an anomaly, not a flow-control mechanism.
    pub fn flush(&mut self) {
        if self.send_buf.is_empty() {
            return;
        }
        match self.stream.write(&self.send_buf) {
            Ok(n) if n < self.send_buf.len() => {
                warn!(staged = self.send_buf.len(), sent = n, "short tcp send");
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                warn!(staged = self.send_buf.len(), "tcp send would block, dropping");
            }
            Err(e) => warn!(error = %e, "tcp send failed"),
        }
        self.send_buf.clear();
    }
}

/// Asks the kernel to attach `SCM_TIMESTAMP` to received segments.
fn enable_rx_timestamps(stream: &TcpStream) -> io::Result<()> {
    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_TIMESTAMP,
            (&raw const one).cast(),
            size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Extracts the `SCM_TIMESTAMP` control message, if present.
fn kernel_timestamp(msg: &libc::msghdr) -> Option<Nanos> {
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(msg);
        while !cmsg.is_null() {
            let hdr = &*cmsg;
            if hdr.cmsg_level == libc::SOL_SOCKET && hdr.cmsg_type == libc::SCM_TIMESTAMP {
                let mut tv: libc::timeval = std::mem::zeroed();
                std::ptr::copy_nonoverlapping(
                    libc::CMSG_DATA(cmsg),
                    (&raw mut tv).cast(),
                    size_of::<libc::timeval>(),
                );
                return Some(tv.tv_sec as Nanos * 1_000_000_000 + tv.tv_usec as Nanos * 1_000);
            }
            cmsg = libc::CMSG_NXTHDR(msg, cmsg);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn pair() -> (TcpConn, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        (TcpConn::from_accepted(accepted).unwrap(), peer)
    }

    #[test]
    fn recv_appends_and_consume_shifts() {
        let (mut conn, mut peer) = pair();
        peer.write_all(b"hello").unwrap();
        // Give the loopback a moment to deliver.
        let mut got = 0;
        for _ in 0..1000 {
            if let RecvStatus::Data(n, rx_ns) = conn.recv() {
                assert!(rx_ns > 0);
                got += n;
                if got == 5 {
                    break;
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(conn.buffer(), b"hello");
        conn.consume(2);
        assert_eq!(conn.buffer(), b"llo");
    }

    #[test]
    fn recv_reports_disconnect_on_peer_close() {
        let (mut conn, peer) = pair();
        drop(peer);
        let mut status = RecvStatus::WouldBlock;
        for _ in 0..1000 {
            status = conn.recv();
            if status != RecvStatus::WouldBlock {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(status, RecvStatus::Disconnected);
    }

    #[test]
    fn staged_bytes_reach_the_peer_on_flush() {
        let (mut conn, mut peer) = pair();
        peer.set_read_timeout(Some(std::time::Duration::from_secs(5))).unwrap();
        conn.stage(b"abc");
        conn.stage(b"def");
        assert!(conn.has_pending_send());
        conn.flush();
        assert!(!conn.has_pending_send());
        let mut buf = [0u8; 6];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abcdef");
    }
}
