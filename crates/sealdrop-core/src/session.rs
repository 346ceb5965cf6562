//! Session orchestration.
//!
//! The functions here are the only place where teardown is guaranteed: a
//! channel handed to [`receive_session`] or [`send_session`] is torn down on
//! every exit path, and all key material is dropped (and zeroized) before
//! they return.

use crate::error::{Error, Phase, PhaseExt, ProtocolError};
use crate::handshake::{client_handshake, server_handshake};
use crate::transfer::{ChunkReceiver, ChunkSender, ChunkSink, OutgoingFile, Progress, TransferReport};
use crate::wire::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use sealdrop_crypto::KdfParams;
use sealdrop_transport::{Channel, TcpListenerHandle, TransportStats, connect};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Default per-operation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything both roles need to run a session.
#[derive(Clone)]
pub struct SessionConfig {
    passphrase: Zeroizing<Vec<u8>>,
    /// Deadline for accept/connect and for every single send or receive
    pub timeout: Duration,
    /// Plaintext bytes per chunk when sending
    pub chunk_size: u32,
    /// Largest chunk accepted when receiving
    pub max_chunk_size: u32,
    /// Argon2id parameters; must match on both peers
    pub kdf: KdfParams,
}

impl SessionConfig {
    /// Configuration with default limits for `passphrase`.
    pub fn new(passphrase: impl Into<Vec<u8>>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase.into()),
            timeout: DEFAULT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            kdf: KdfParams::default(),
        }
    }

    /// Set the per-operation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the sending chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the largest accepted chunk.
    #[must_use]
    pub fn with_max_chunk_size(mut self, max_chunk_size: u32) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    /// Set the key derivation parameters.
    #[must_use]
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub(crate) fn passphrase(&self) -> &[u8] {
        &self.passphrase
    }

    /// Check all limits before any socket is touched.
    ///
    /// # Errors
    ///
    /// Returns a [`Phase::Setup`] error describing the first bad value.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: String| Error::new(Phase::Setup, ProtocolError::InvalidConfig(msg));

        if self.passphrase.is_empty() {
            return Err(invalid("passphrase must not be empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(invalid("timeout must be greater than zero".into()));
        }
        if self.max_chunk_size == 0 || self.max_chunk_size > MAX_CHUNK_SIZE {
            return Err(invalid(format!(
                "max_chunk_size must be between 1 and {MAX_CHUNK_SIZE}"
            )));
        }
        if self.chunk_size == 0 || self.chunk_size > self.max_chunk_size {
            return Err(invalid(format!(
                "chunk_size must be between 1 and max_chunk_size ({})",
                self.max_chunk_size
            )));
        }
        self.kdf.validate().in_phase(Phase::Setup)
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("passphrase", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("chunk_size", &self.chunk_size)
            .field("max_chunk_size", &self.max_chunk_size)
            .field("kdf", &self.kdf)
            .finish()
    }
}

/// Outcome of a whole session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Remote address, when the session ran over TCP
    pub peer: Option<SocketAddr>,
    /// Non-secret identifier of the session key
    pub key_fingerprint: [u8; 8],
    /// One entry per completed file
    pub files: Vec<TransferReport>,
    /// Channel counters at teardown
    pub stats: TransportStats,
    /// Wall time from handshake start to teardown
    pub elapsed: Duration,
}

impl SessionReport {
    /// Plaintext bytes over all files.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes).sum()
    }
}

fn log_outcome<T>(role: &str, result: &Result<T, Error>) {
    if let Err(e) = result {
        if e.is_security() {
            warn!(role, phase = %e.phase, security = true, "session aborted: {}", e.kind);
        } else {
            warn!(role, phase = %e.phase, "session aborted: {}", e.kind);
        }
    }
}

/// Accept one client on `listener` and receive its files into `sink`.
///
/// # Errors
///
/// See [`receive_session`]; accept failures are reported in [`Phase::Setup`].
pub fn run_server<S, P>(
    listener: &TcpListenerHandle,
    config: &SessionConfig,
    sink: &mut S,
    progress: &mut P,
) -> Result<SessionReport, Error>
where
    S: ChunkSink + ?Sized,
    P: Progress + ?Sized,
{
    config.validate()?;
    let session = listener
        .accept_connection(config.timeout)
        .in_phase(Phase::Setup)?;
    let peer = session.peer_addr();
    info!(%peer, "client connected");

    let mut report = receive_session(session, config, sink, progress)?;
    report.peer = Some(peer);
    Ok(report)
}

/// Connect to `addr` and send `files`.
///
/// # Errors
///
/// See [`send_session`]; an empty file list and connect failures are
/// reported in [`Phase::Setup`].
pub fn run_client<P>(
    addr: &str,
    config: &SessionConfig,
    files: Vec<OutgoingFile>,
    progress: &mut P,
) -> Result<SessionReport, Error>
where
    P: Progress + ?Sized,
{
    config.validate()?;
    if files.is_empty() {
        return Err(Error::new(Phase::Setup, ProtocolError::EmptyFileList));
    }

    let session = connect(addr, config.timeout).in_phase(Phase::Setup)?;
    let peer = session.peer_addr();
    info!(%peer, files = files.len(), "connected to server");

    let mut report = send_session(session, config, files, progress)?;
    report.peer = Some(peer);
    Ok(report)
}

/// Run the receiving role over an established channel, then tear it down.
///
/// # Errors
///
/// The first failure of handshake, naming, chunk transfer or final ack.
pub fn receive_session<C, S, P>(
    mut channel: C,
    config: &SessionConfig,
    sink: &mut S,
    progress: &mut P,
) -> Result<SessionReport, Error>
where
    C: Channel,
    S: ChunkSink + ?Sized,
    P: Progress + ?Sized,
{
    let start = Instant::now();
    let result = drive_receiver(&mut channel, config, sink, progress);
    let stats = channel.stats();
    channel.teardown();
    log_outcome("server", &result);

    let (key_fingerprint, files) = result?;
    info!(files = files.len(), "session complete");
    Ok(SessionReport {
        peer: None,
        key_fingerprint,
        files,
        stats,
        elapsed: start.elapsed(),
    })
}

fn drive_receiver<C, S, P>(
    ch: &mut C,
    config: &SessionConfig,
    sink: &mut S,
    progress: &mut P,
) -> Result<([u8; 8], Vec<TransferReport>), Error>
where
    C: Channel,
    S: ChunkSink + ?Sized,
    P: Progress + ?Sized,
{
    ch.set_timeout(config.timeout).in_phase(Phase::Setup)?;

    let key = server_handshake(ch, config.passphrase(), &config.kdf)?;
    let fingerprint = key.fingerprint();
    let mut receiver = ChunkReceiver::new(&key, config.max_chunk_size).in_phase(Phase::Setup)?;
    drop(key);

    let mut files = Vec::new();
    loop {
        match receiver.receive_file(ch, sink, progress) {
            Ok(Some(report)) => {
                progress.finish(&report);
                files.push(report);
            }
            Ok(None) => break,
            Err(e) => {
                progress.fail(&e);
                return Err(e);
            }
        }
    }

    Ok((fingerprint, files))
}

/// Run the sending role over an established channel, then tear it down.
///
/// # Errors
///
/// The first failure of handshake, naming, chunk transfer or final ack.
pub fn send_session<C, P>(
    mut channel: C,
    config: &SessionConfig,
    files: Vec<OutgoingFile>,
    progress: &mut P,
) -> Result<SessionReport, Error>
where
    C: Channel,
    P: Progress + ?Sized,
{
    let start = Instant::now();
    let result = drive_sender(&mut channel, config, files, progress);
    let stats = channel.stats();
    channel.teardown();
    log_outcome("client", &result);

    let (key_fingerprint, files) = result?;
    info!(files = files.len(), "session complete");
    Ok(SessionReport {
        peer: None,
        key_fingerprint,
        files,
        stats,
        elapsed: start.elapsed(),
    })
}

fn drive_sender<C, P>(
    ch: &mut C,
    config: &SessionConfig,
    files: Vec<OutgoingFile>,
    progress: &mut P,
) -> Result<([u8; 8], Vec<TransferReport>), Error>
where
    C: Channel,
    P: Progress + ?Sized,
{
    ch.set_timeout(config.timeout).in_phase(Phase::Setup)?;

    let key = client_handshake(ch, config.passphrase(), &config.kdf)?;
    let fingerprint = key.fingerprint();
    let mut sender = ChunkSender::new(&key, config.chunk_size).in_phase(Phase::Setup)?;
    drop(key);

    let mut reports = Vec::with_capacity(files.len());
    for mut file in files {
        match sender.send_file(ch, &mut file, progress) {
            Ok(report) => {
                progress.finish(&report);
                reports.push(report);
            }
            Err(e) => {
                progress.fail(&e);
                return Err(e);
            }
        }
    }
    sender.finish(ch)?;

    Ok((fingerprint, reports))
}
