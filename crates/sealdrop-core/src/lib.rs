//! # sealdrop Core
//!
//! Protocol logic for sealdrop: a secure, chunked file transfer over one
//! byte-stream connection.
//!
//! This crate provides:
//! - Wire records with bounded length fields
//! - The handshake state machine (ready, salt, key derivation, confirmation)
//! - The chunk transfer loop (sealed chunks, authenticated EOF, ack/receipt)
//! - Session orchestration with guaranteed teardown
//! - Error types tagged with the protocol phase that failed
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ session    accept/connect, teardown, reports  │
//! ├───────────────────────────────────────────────┤
//! │ handshake  ready, salt, KDF, key confirmation │
//! │ transfer   name, sealed chunks, ack, receipt  │
//! ├───────────────────────────────────────────────┤
//! │ wire       fixed records over a Channel       │
//! └───────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod handshake;
pub mod session;
pub mod transfer;
pub mod wire;

pub use error::{Error, ErrorKind, Phase, ProtocolError};
pub use handshake::{Handshake, HandshakeState, client_handshake, server_handshake};
pub use session::{
    DEFAULT_TIMEOUT, SessionConfig, SessionReport, receive_session, run_client, run_server,
    send_session,
};
pub use transfer::{
    ChunkReceiver, ChunkSender, ChunkSink, MemorySink, NoProgress, OutgoingFile, Progress,
    TransferReport,
};
pub use wire::{DEFAULT_CHUNK_SIZE, FileName, MAX_CHUNK_SIZE, MAX_FILE_NAME_LEN};
