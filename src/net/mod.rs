//! Non-blocking network plumbing: multicast datagram transport, buffered TCP
//! connections with kernel receive timestamps, and the epoll-driven TCP
//! server behind the order gateway.

pub mod mcast;
pub mod server;
pub mod tcp;

use thiserror::Error;

/// Socket setup and polling failures.
///
/// Only configuration-time operations surface these; steady-state I/O errors
/// are handled in place (logged, or the session queued for disconnect).
#[derive(Debug, Error)]
pub enum NetError {
    /// An underlying socket call failed.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// An address failed to parse or resolve.
    #[error("bad address {addr}: {reason}")]
    BadAddress {
        /// The offending address text.
        addr: String,
        /// Why it was rejected.
        reason: String,
    },
}
