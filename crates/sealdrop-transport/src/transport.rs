//! Channel abstraction shared by the protocol layer.
//!
//! The handshake and transfer code only ever talk to a [`Channel`]: a
//! reliable byte stream that either moves the full requested length or
//! fails. [`crate::TcpSession`] is the production implementation.

use std::io;
use std::time::Duration;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Address binding failed
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// Address that could not be bound
        addr: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Listening on a bound socket failed
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        /// Bound address
        addr: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Accepting a client failed
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// Connecting to the server failed
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Target address
        addr: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Address resolution failed
    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        /// Address as given
        addr: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// An operation did not complete before its deadline
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that timed out (`accept`, `connect`, `send`, `receive`)
        operation: &'static str,
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// The peer closed the connection, or the session was torn down
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The OS accepted zero bytes for a non-empty write
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes written before the stall
        written: usize,
        /// Bytes requested
        expected: usize,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Other I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether the whole session setup may reasonably be attempted again.
    ///
    /// Only failures to establish a connection qualify; nothing that happens
    /// after bytes were exchanged is retryable.
    #[must_use]
    pub fn is_retryable_setup(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::Timeout {
                    operation: "connect",
                    ..
                }
        )
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Reliable, ordered byte stream between the two peers.
///
/// Every call either transfers exactly the requested number of bytes or
/// returns an error; callers never see partial reads or writes.
pub trait Channel {
    /// Send all of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Timeout`], [`TransportError::ConnectionClosed`]
    /// or [`TransportError::ShortWrite`] if `buf` could not be written fully.
    fn send_all(&mut self, buf: &[u8]) -> TransportResult<()>;

    /// Fill `buf` completely from the stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the peer closes before
    /// `buf.len()` bytes arrived and [`TransportError::Timeout`] on deadline.
    fn receive_into(&mut self, buf: &mut [u8]) -> TransportResult<()>;

    /// Receive exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// Same as [`Channel::receive_into`].
    fn receive_all(&mut self, len: usize) -> TransportResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.receive_into(&mut buf)?;
        Ok(buf)
    }

    /// Configure both send and receive deadlines.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] for a zero duration.
    fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()>;

    /// Release the connection. Idempotent and infallible.
    fn teardown(&mut self);

    /// Traffic counters for this channel.
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn send_all(&mut self, buf: &[u8]) -> TransportResult<()> {
        (**self).send_all(buf)
    }

    fn receive_into(&mut self, buf: &mut [u8]) -> TransportResult<()> {
        (**self).receive_into(buf)
    }

    fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()> {
        (**self).set_timeout(timeout)
    }

    fn teardown(&mut self) {
        (**self).teardown();
    }

    fn stats(&self) -> TransportStats {
        (**self).stats()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Completed `send_all` calls
    pub messages_sent: u64,
    /// Completed `receive_into` calls
    pub messages_received: u64,
    /// Send errors
    pub send_errors: u64,
    /// Receive errors
    pub recv_errors: u64,
}

impl TransportStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful send
    pub fn record_send(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.messages_sent += 1;
    }

    /// Record a successful receive
    pub fn record_recv(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.messages_received += 1;
    }

    /// Record a send error
    pub fn record_send_error(&mut self) {
        self.send_errors += 1;
    }

    /// Record a receive error
    pub fn record_recv_error(&mut self) {
        self.recv_errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_stats() {
        let mut stats = TransportStats::new();
        assert_eq!(stats.bytes_sent, 0);

        stats.record_send(100);
        stats.record_send(28);
        assert_eq!(stats.bytes_sent, 128);
        assert_eq!(stats.messages_sent, 2);

        stats.record_recv(200);
        assert_eq!(stats.bytes_received, 200);
        assert_eq!(stats.messages_received, 1);

        stats.record_send_error();
        stats.record_recv_error();
        assert_eq!(stats.send_errors, 1);
        assert_eq!(stats.recv_errors, 1);
    }

    #[test]
    fn test_retryable_setup_errors() {
        let refused = TransportError::Connect {
            addr: "127.0.0.1:1".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(refused.is_retryable_setup());

        let connect_timeout = TransportError::Timeout {
            operation: "connect",
            timeout: Duration::from_secs(1),
        };
        assert!(connect_timeout.is_retryable_setup());

        let receive_timeout = TransportError::Timeout {
            operation: "receive",
            timeout: Duration::from_secs(1),
        };
        assert!(!receive_timeout.is_retryable_setup());
        assert!(!TransportError::ConnectionClosed.is_retryable_setup());
    }
}
