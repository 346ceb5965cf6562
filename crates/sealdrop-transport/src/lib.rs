//! # sealdrop Transport
//!
//! Byte-stream transport for the sealdrop protocol.
//!
//! This crate provides:
//! - Listener setup and bounded-time accept for the receiving side
//! - Bounded-time connect for the sending side
//! - Full-length send/receive with per-call deadlines
//! - Idempotent teardown (also run on drop)
//! - A scoped network-subsystem guard for process start/end
//!
//! Everything is blocking. One connection is served by one thread of
//! control; the protocol layer is written against the [`Channel`] trait.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod network;
pub mod tcp;
pub mod transport;

pub use network::NetworkGuard;
pub use tcp::{TcpListenerHandle, TcpSession, connect, setup_server};
pub use transport::{Channel, TransportError, TransportResult, TransportStats};

use std::fmt;

/// Which side of the connection a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepted by a listener; receives files
    Server,
    /// Initiated with [`connect`]; sends files
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}
