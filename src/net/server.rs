//! Readiness-polled TCP server.
//!
//! One epoll instance watches the listener and every accepted connection.
//! [`TcpServer::poll`] reaps readiness events, accepts all pending
//! connections and classifies the rest into recv-ready and disconnect sets;
//! [`TcpServer::send_and_recv`] performs one read per recv-ready connection,
//! fires the owner's per-connection callback with the kernel receive
//! timestamp, fires the batch-end callback once any connection produced
//! bytes, and flushes staged sends. Disconnected connections are removed at
//! the top of the next poll.

use super::NetError;
use super::tcp::{RecvStatus, TcpConn};
use crate::types::Nanos;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::AsRawFd;
use tracing::{debug, trace, warn};

/// Dense handle for an accepted connection; stable for the session lifetime.
pub type ConnId = usize;

/// Token marking the listener in epoll events.
const LISTENER_TOKEN: u64 = u64::MAX;

/// What the server's owner does with inbound bytes.
pub trait ServerEvents {
    /// Bytes arrived on `conn` at kernel time `rx_ns`; frame and consume
    /// them from the connection's buffer.
    fn on_data(&mut self, conn_id: ConnId, conn: &mut TcpConn, rx_ns: Nanos);

    /// All recv-ready connections have been read this cycle. The order
    /// server publishes its sequencer batch from here.
    fn on_batch_done(&mut self);

    /// `conn_id` is about to be dropped.
    fn on_disconnect(&mut self, conn_id: ConnId) {
        let _ = conn_id;
    }
}

/// Epoll-driven TCP acceptor and connection set.
pub struct TcpServer {
    epoll_fd: i32,
    listener: TcpListener,
    conns: Vec<Option<TcpConn>>,
    recv_ready: Vec<ConnId>,
    disconnected: Vec<ConnId>,
}

impl TcpServer {
    /// Binds `addr` and registers the listener with a fresh epoll instance.
    pub fn listen(addr: SocketAddr) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        epoll_add(epoll_fd, listener.as_raw_fd(), LISTENER_TOKEN)?;
        debug!(%addr, "order gateway listening");
        Ok(TcpServer {
            epoll_fd,
            listener,
            conns: Vec::new(),
            recv_ready: Vec::new(),
            disconnected: Vec::new(),
        })
    }

    /// The locally bound address (useful when listening on port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of live connections.
    pub fn connections(&self) -> usize {
        self.conns.iter().filter(|c| c.is_some()).count()
    }

    /// Reaps readiness: drops connections queued for disconnect, waits
    /// without blocking, accepts all pending connections and records which
    /// established connections are readable.
    pub fn poll(&mut self, events: &mut impl ServerEvents) {
        for conn_id in std::mem::take(&mut self.disconnected) {
            self.drop_conn(conn_id, events);
        }
        self.recv_ready.clear();

        let mut ready = [libc::epoll_event { events: 0, u64: 0 }; 1024];
        let n = unsafe {
            libc::epoll_wait(self.epoll_fd, ready.as_mut_ptr(), ready.len() as i32, 0)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                warn!(error = %err, "epoll_wait failed");
            }
            return;
        }

        let mut accept_pending = false;
        for event in &ready[..n as usize] {
            if event.u64 == LISTENER_TOKEN {
                accept_pending = true;
                continue;
            }
            let conn_id = event.u64 as ConnId;
            if event.events & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0 {
                if !self.disconnected.contains(&conn_id) {
                    self.disconnected.push(conn_id);
                }
                continue;
            }
            if event.events & libc::EPOLLIN as u32 != 0 && !self.recv_ready.contains(&conn_id) {
                self.recv_ready.push(conn_id);
            }
        }

        while accept_pending {
            match self.listener.accept() {
                Ok((stream, peer)) => match TcpConn::from_accepted(stream) {
                    Ok(conn) => {
                        let conn_id = self.store(conn);
                        let fd = self.conns[conn_id].as_ref().unwrap().raw_fd();
                        if let Err(e) = epoll_add(self.epoll_fd, fd, conn_id as u64) {
                            warn!(error = %e, "failed to watch accepted connection");
                            self.conns[conn_id] = None;
                            continue;
                        }
                        debug!(%peer, conn_id, "accepted connection");
                        self.recv_ready.push(conn_id);
                    }
                    Err(e) => warn!(error = %e, "failed to adopt accepted connection"),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// One read per recv-ready connection, the batch-end hook, then a flush
    /// of every staged send buffer.
    pub fn send_and_recv(&mut self, events: &mut impl ServerEvents) {
        let mut any_data = false;
        for i in 0..self.recv_ready.len() {
            let conn_id = self.recv_ready[i];
            let Some(conn) = self.conns.get_mut(conn_id).and_then(Option::as_mut) else {
                continue;
            };
            match conn.recv() {
                RecvStatus::Data(_, rx_ns) => {
                    any_data = true;
                    events.on_data(conn_id, conn, rx_ns);
                }
                RecvStatus::WouldBlock => {}
                RecvStatus::Disconnected => {
                    trace!(conn_id, "peer disconnected");
                    if !self.disconnected.contains(&conn_id) {
                        self.disconnected.push(conn_id);
                    }
                }
            }
        }
        if any_data {
            events.on_batch_done();
        }
        for conn in self.conns.iter_mut().flatten() {
            conn.flush();
        }
    }

    /// Exclusive access to a live connection, for staging outbound records.
    pub fn conn_mut(&mut self, conn_id: ConnId) -> Option<&mut TcpConn> {
        self.conns.get_mut(conn_id).and_then(Option::as_mut)
    }

    /// Flushes every connection's staged bytes without reading.
    pub fn flush_staged(&mut self) {
        for conn in self.conns.iter_mut().flatten() {
            conn.flush();
        }
    }

    fn store(&mut self, conn: TcpConn) -> ConnId {
        match self.conns.iter().position(Option::is_none) {
            Some(slot) => {
                self.conns[slot] = Some(conn);
                slot
            }
            None => {
                self.conns.push(Some(conn));
                self.conns.len() - 1
            }
        }
    }

    fn drop_conn(&mut self, conn_id: ConnId, events: &mut impl ServerEvents) {
        if let Some(conn) = self.conns.get_mut(conn_id).and_then(Option::take) {
            events.on_disconnect(conn_id);
            let rc = unsafe {
                libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, conn.raw_fd(), std::ptr::null_mut())
            };
            if rc != 0 {
                warn!(conn_id, error = %io::Error::last_os_error(), "epoll del failed");
            }
            debug!(conn_id, "connection removed");
        }
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        unsafe { libc::close(self.epoll_fd) };
    }
}

fn epoll_add(epoll_fd: i32, fd: i32, token: u64) -> io::Result<()> {
    let mut event = libc::epoll_event {
        events: libc::EPOLLIN as u32,
        u64: token,
    };
    let rc = unsafe { libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut event) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
