//! Error types for the sealdrop core protocol.
//!
//! Every failure that leaves the core is an [`Error`]: the protocol
//! [`Phase`] that failed plus an [`ErrorKind`]. Messages never contain key
//! material or plaintext.

use crate::handshake::HandshakeState;
use sealdrop_crypto::CryptoError;
use sealdrop_transport::TransportError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Protocol step during which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Listening, accepting or connecting
    Setup,
    /// Ready signal, salt exchange, key derivation, key confirmation
    Handshake,
    /// File name exchange
    Naming,
    /// Encrypted chunk loop
    ChunkTransfer,
    /// Transfer acknowledgment and receipt
    FinalAck,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Setup => "setup",
            Self::Handshake => "handshake",
            Self::Naming => "file naming",
            Self::ChunkTransfer => "chunk transfer",
            Self::FinalAck => "final acknowledgment",
        };
        f.write_str(name)
    }
}

/// A failed session step.
#[derive(Debug, Error)]
#[error("{phase} failed{}", display_state(.handshake_state))]
pub struct Error {
    /// Step that failed
    pub phase: Phase,
    /// Last live handshake state, for failures during the handshake
    pub handshake_state: Option<HandshakeState>,
    /// What went wrong
    #[source]
    pub kind: ErrorKind,
}

fn display_state(state: &Option<HandshakeState>) -> String {
    state.map_or_else(String::new, |s| format!(" in state {s:?}"))
}

impl Error {
    /// Create an error for `phase`.
    pub fn new(phase: Phase, kind: impl Into<ErrorKind>) -> Self {
        Self {
            phase,
            handshake_state: None,
            kind: kind.into(),
        }
    }

    /// Record the handshake state the failure happened in.
    #[must_use]
    pub fn at_state(mut self, state: HandshakeState) -> Self {
        self.handshake_state = Some(state);
        self
    }

    /// Whether the failure indicates tampering or a wrong shared secret
    /// rather than an ordinary I/O problem.
    #[must_use]
    pub fn is_security(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::KeyMismatch
                | ErrorKind::NonceOutOfSequence { .. }
                | ErrorKind::Crypto(CryptoError::TagMismatch)
        )
    }

    /// Whether the peer went away (EOF, reset, broken pipe).
    #[must_use]
    pub fn is_connection_closed(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Transport(TransportError::ConnectionClosed)
        )
    }

    /// Whether an operation ran into its deadline.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport(TransportError::Timeout { .. }))
    }

    /// Whether an outer layer may start the whole session again.
    ///
    /// Only connection establishment failures qualify.
    #[must_use]
    pub fn is_retryable_setup(&self) -> bool {
        self.phase == Phase::Setup
            && matches!(&self.kind, ErrorKind::Transport(e) if e.is_retryable_setup())
    }
}

/// Failure categories.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Socket-level failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Peer misbehavior or malformed framing
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Cryptographic failure (tag mismatch, KDF failure, nonce exhaustion)
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Local file source or sink failure
    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    /// Key confirmation tags differ: the peers derived different keys
    #[error("key confirmation failed: shared secrets do not match")]
    KeyMismatch,

    /// A chunk arrived with a nonce other than the next one in sequence
    #[error("chunk nonce out of sequence: expected counter {expected}, got {actual}")]
    NonceOutOfSequence {
        /// Counter the receiver expected
        expected: u64,
        /// Counter carried by the chunk
        actual: u64,
    },
}

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A fixed sentinel did not match
    #[error("unexpected sentinel: expected {expected:02X?}, got {actual:02X?}")]
    UnexpectedSentinel {
        /// Sentinel required at this step
        expected: [u8; 4],
        /// Bytes actually received
        actual: [u8; 4],
    },

    /// File name length field exceeds the maximum
    #[error("file name too long: {len} bytes (max {max})")]
    NameTooLong {
        /// Announced length
        len: usize,
        /// Maximum accepted length
        max: usize,
    },

    /// File name is not a plain, safe base name
    #[error("invalid file name: {0}")]
    InvalidFileName(&'static str),

    /// Chunk size field exceeds the maximum
    #[error("chunk too large: {size} bytes (max {max})")]
    ChunkTooLarge {
        /// Announced size
        size: u32,
        /// Maximum accepted size
        max: u32,
    },

    /// Handshake state machine was driven out of order
    #[error("invalid handshake transition {from:?} -> {to:?}")]
    InvalidState {
        /// Current state
        from: HandshakeState,
        /// Requested state
        to: HandshakeState,
    },

    /// A client session was started with nothing to send
    #[error("no files to send")]
    EmptyFileList,

    /// Session configuration is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Attach a [`Phase`] to a lower-level result.
pub(crate) trait PhaseExt<T> {
    fn in_phase(self, phase: Phase) -> Result<T, Error>;
}

impl<T, E: Into<ErrorKind>> PhaseExt<T> for Result<T, E> {
    fn in_phase(self, phase: Phase) -> Result<T, Error> {
        self.map_err(|e| Error::new(phase, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_security_classification() {
        assert!(Error::new(Phase::Handshake, ErrorKind::KeyMismatch).is_security());
        assert!(Error::new(Phase::ChunkTransfer, CryptoError::TagMismatch).is_security());
        assert!(
            Error::new(
                Phase::ChunkTransfer,
                ErrorKind::NonceOutOfSequence {
                    expected: 1,
                    actual: 0
                }
            )
            .is_security()
        );

        assert!(!Error::new(Phase::ChunkTransfer, TransportError::ConnectionClosed).is_security());
        assert!(!Error::new(Phase::Naming, ProtocolError::EmptyFileList).is_security());
    }

    #[test]
    fn test_retryable_only_during_setup() {
        let timeout = || TransportError::Timeout {
            operation: "connect",
            timeout: Duration::from_secs(1),
        };

        assert!(Error::new(Phase::Setup, timeout()).is_retryable_setup());
        assert!(!Error::new(Phase::Handshake, timeout()).is_retryable_setup());
        assert!(Error::new(Phase::Handshake, timeout()).is_timeout());
    }

    #[test]
    fn test_display_names_phase() {
        let err = Error::new(Phase::FinalAck, TransportError::ConnectionClosed);
        assert_eq!(err.to_string(), "final acknowledgment failed");
        assert!(err.is_connection_closed());
        assert_eq!(err.handshake_state, None);

        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "connection closed by peer");
    }

    #[test]
    fn test_display_names_handshake_state() {
        let err = Error::new(Phase::Handshake, ErrorKind::KeyMismatch)
            .at_state(HandshakeState::AwaitingAck);
        assert_eq!(err.to_string(), "handshake failed in state AwaitingAck");
    }
}
